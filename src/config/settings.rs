use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default port of an externally hosted backend.
pub const DEFAULT_EXTERNAL_PORT: u16 = 7658;

/// How the bridge reaches the backend process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawn `solargraph socket` on an ephemeral port and connect over loopback TCP
    #[default]
    Socket,
    /// Spawn `solargraph stdio` and talk over the child's pipes
    Stdio,
    /// Connect to a backend somebody else started
    External,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Socket => "socket",
            TransportKind::Stdio => "stdio",
            TransportKind::External => "external",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExternalServer {
    pub host: String,
    pub port: u16,
}

impl Default for ExternalServer {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_EXTERNAL_PORT,
        }
    }
}

/// Shell used to launch the backend, overriding the per-OS default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ShellOverride {
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// User-facing settings, keyed like the editor's `solargraph.*` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub command_path: String,
    pub use_bundler: bool,
    pub bundler_path: String,
    pub with_snippets: bool,
    pub transport: TransportKind,
    pub external_server: ExternalServer,
    pub check_gem_version: bool,
    pub views_path: Option<PathBuf>,
    pub shell: Option<ShellOverride>,
    pub auto_restart: bool,
    pub log_level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            command_path: "solargraph".to_string(),
            use_bundler: false,
            bundler_path: "bundle".to_string(),
            with_snippets: false,
            transport: TransportKind::default(),
            external_server: ExternalServer::default(),
            check_gem_version: true,
            views_path: None,
            shell: None,
            auto_restart: true,
            log_level: None,
        }
    }
}

/// Partial settings as found in a single layer (file or override).
///
/// Every field is optional so that a layer only overrides what it names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsLayer {
    pub command_path: Option<String>,
    pub use_bundler: Option<bool>,
    pub bundler_path: Option<String>,
    pub with_snippets: Option<bool>,
    pub transport: Option<TransportKind>,
    pub external_server: Option<ExternalServer>,
    pub check_gem_version: Option<bool>,
    pub views_path: Option<PathBuf>,
    pub shell: Option<ShellOverride>,
    pub auto_restart: Option<bool>,
    pub log_level: Option<String>,
}

impl Settings {
    /// Apply a layer on top of these settings, preferring the layer's values.
    pub fn apply(&mut self, layer: SettingsLayer) {
        if let Some(command_path) = layer.command_path.filter(|s| !s.trim().is_empty()) {
            self.command_path = command_path;
        }
        if let Some(use_bundler) = layer.use_bundler {
            self.use_bundler = use_bundler;
        }
        if let Some(bundler_path) = layer.bundler_path.filter(|s| !s.trim().is_empty()) {
            self.bundler_path = bundler_path;
        }
        if let Some(with_snippets) = layer.with_snippets {
            self.with_snippets = with_snippets;
        }
        if let Some(transport) = layer.transport {
            self.transport = transport;
        }
        if let Some(external_server) = layer.external_server {
            self.external_server = external_server;
        }
        if let Some(check) = layer.check_gem_version {
            self.check_gem_version = check;
        }
        if layer.views_path.is_some() {
            self.views_path = layer.views_path;
        }
        if layer.shell.is_some() {
            self.shell = layer.shell;
        }
        if let Some(auto_restart) = layer.auto_restart {
            self.auto_restart = auto_restart;
        }
        if layer.log_level.is_some() {
            self.log_level = layer.log_level;
        }
    }

    /// Settings forwarded to the backend as initialization options.
    pub fn to_initialization_options(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
