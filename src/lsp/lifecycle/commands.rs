//! User-facing commands.

use log::info;
use percent_encoding::percent_decode_str;
use serde_json::Value;

use super::{Connector, LifecycleController};
use crate::error::{BridgeError, BridgeResult};
use crate::host::{EditorHost, MessageKind};
use crate::lsp::rewriter::OPEN_DOCUMENT_URL_COMMAND;
use crate::lsp::transport::launch::{CommandOutput, run_backend};
use crate::lsp::virtual_uri::VirtualDocumentUri;

pub const RESTART: &str = "solargraph.restart";
pub const SEARCH: &str = "solargraph.search";
pub const OPEN_DOCUMENT: &str = "solargraph._openDocument";
pub const CHECK_GEM_VERSION: &str = "solargraph.checkGemVersion";
pub const BUILD_GEM_DOCS: &str = "solargraph.buildGemDocs";
pub const REBUILD_GEM_DOCS: &str = "solargraph.rebuildAllGemDocs";
pub const WRITE_DEFAULT_CONFIG: &str = "solargraph.config";
pub const DOWNLOAD_CORE: &str = "solargraph.downloadCore";
pub const PREPARE: &str = "solargraph.prepare";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Restart,
    /// Search the documentation; prompts for the term when `None`.
    SearchDocumentation { query: Option<String> },
    /// Open a `solargraph:` page URI.
    OpenDocumentUrl { uri: String },
    CheckGemVersion,
    BuildGemDocs { rebuild: bool },
    WriteDefaultConfig,
    DownloadCore,
    /// Pre-build the workspace's documentation cache.
    Prepare,
}

impl Command {
    /// Every command id an editor should register.
    pub const IDS: [&'static str; 10] = [
        RESTART,
        SEARCH,
        OPEN_DOCUMENT_URL_COMMAND,
        OPEN_DOCUMENT,
        CHECK_GEM_VERSION,
        BUILD_GEM_DOCS,
        REBUILD_GEM_DOCS,
        WRITE_DEFAULT_CONFIG,
        DOWNLOAD_CORE,
        PREPARE,
    ];

    /// Command for an editor command id and its JSON arguments.
    pub fn parse(id: &str, arguments: &[Value]) -> Option<Self> {
        let first_string = || arguments.first().and_then(Value::as_str).map(str::to_string);
        match id {
            RESTART => Some(Command::Restart),
            SEARCH => Some(Command::SearchDocumentation { query: first_string() }),
            OPEN_DOCUMENT_URL_COMMAND | OPEN_DOCUMENT => {
                first_string().map(|uri| Command::OpenDocumentUrl { uri })
            }
            CHECK_GEM_VERSION => Some(Command::CheckGemVersion),
            BUILD_GEM_DOCS => Some(Command::BuildGemDocs { rebuild: false }),
            REBUILD_GEM_DOCS => Some(Command::BuildGemDocs { rebuild: true }),
            WRITE_DEFAULT_CONFIG => Some(Command::WriteDefaultConfig),
            DOWNLOAD_CORE => Some(Command::DownloadCore),
            PREPARE => Some(Command::Prepare),
            _ => None,
        }
    }

    /// Command behind a `command:<id>?<json>` link, as produced by the
    /// documentation link rewriter.
    pub fn from_command_uri(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("command:")?;
        let (id, encoded) = rest.split_once('?').unwrap_or((rest, ""));
        let arguments = if encoded.is_empty() {
            Vec::new()
        } else {
            let decoded = percent_decode_str(encoded).decode_utf8().ok()?;
            match serde_json::from_str::<Value>(&decoded).ok()? {
                Value::Array(values) => values,
                value => vec![value],
            }
        };
        Self::parse(id, &arguments)
    }

    pub fn id(&self) -> &'static str {
        match self {
            Command::Restart => RESTART,
            Command::SearchDocumentation { .. } => SEARCH,
            Command::OpenDocumentUrl { .. } => OPEN_DOCUMENT_URL_COMMAND,
            Command::CheckGemVersion => CHECK_GEM_VERSION,
            Command::BuildGemDocs { rebuild: false } => BUILD_GEM_DOCS,
            Command::BuildGemDocs { rebuild: true } => REBUILD_GEM_DOCS,
            Command::WriteDefaultConfig => WRITE_DEFAULT_CONFIG,
            Command::DownloadCore => DOWNLOAD_CORE,
            Command::Prepare => PREPARE,
        }
    }
}

impl<H: EditorHost, C: Connector> LifecycleController<H, C> {
    /// Run a user command. Outcomes are reported through the host.
    pub async fn execute(&self, command: Command) -> BridgeResult<()> {
        info!(
            target: "solargraph_bridge::lifecycle",
            "Executing {}",
            command.id()
        );
        match command {
            Command::Restart => self.restart().await,
            Command::SearchDocumentation { query } => {
                let query = match query {
                    Some(query) => query,
                    None => match self.host().prompt_input("Search Ruby documentation:").await {
                        Some(query) => query,
                        None => return Ok(()),
                    },
                };
                let query = query.trim();
                if query.is_empty() {
                    return Ok(());
                }
                self.open_documentation(&VirtualDocumentUri::search(query))
            }
            Command::OpenDocumentUrl { uri } => self.open_documentation(&uri),
            Command::CheckGemVersion => self.current_bridge()?.check_gem_version(true).await,
            Command::BuildGemDocs { rebuild } => self.build_gem_docs(rebuild).await,
            Command::WriteDefaultConfig => {
                let output = run_backend(&self.config(), &["config"]).await?;
                self.report_output(&output, "Created default .solargraph.yml file.", "config")
                    .await
            }
            Command::DownloadCore => match self.current_bridge() {
                Ok(bridge) => bridge.download_core().await,
                Err(_) => {
                    let output = run_backend(&self.config(), &["download-core"]).await?;
                    self.report_output(&output, "Core documentation downloaded.", "download-core")
                        .await
                }
            },
            Command::Prepare => {
                let config = self.config();
                let workspace = config
                    .workspace()
                    .map(|path| path.display().to_string())
                    .ok_or_else(|| BridgeError::config("prepare needs a workspace folder"))?;
                let output = run_backend(&config, &["prepare", &workspace]).await?;
                self.report_output(&output, "Workspace prepared.", "prepare").await
            }
        }
    }

    async fn build_gem_docs(&self, rebuild: bool) -> BridgeResult<()> {
        let bridge = self.current_bridge()?;
        self.host().set_status(if rebuild {
            "Solargraph: rebuilding gem documentation"
        } else {
            "Solargraph: building gem documentation"
        });
        let result = bridge.document_gems(rebuild).await;
        self.host().set_status("Solargraph: ready");

        match result {
            Ok(_) => {
                self.host()
                    .show_message(MessageKind::Info, "Gem documentation complete.", &[])
                    .await;
                Ok(())
            }
            Err(e) => {
                self.host()
                    .show_message(
                        MessageKind::Error,
                        &format!("Failed to build gem documentation: {}", e),
                        &[],
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn report_output(&self, output: &CommandOutput, success: &str, subcommand: &str) -> BridgeResult<()> {
        if output.success {
            self.host().show_message(MessageKind::Info, success, &[]).await;
            return Ok(());
        }
        let detail = match output.stderr.trim() {
            "" => output.stdout.trim(),
            stderr => stderr,
        };
        self.host()
            .show_message(
                MessageKind::Error,
                &format!("`solargraph {}` failed: {}", subcommand, detail),
                &[],
            )
            .await;
        Err(BridgeError::request_failed(subcommand, detail))
    }
}
