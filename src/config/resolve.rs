//! Resolved, immutable configuration snapshot.
//!
//! `Settings` is what the user wrote; `Configuration` is what a bridge runs
//! with: the backend command resolved against PATH and the workspace, the
//! bundler wrapper applied, and a shell picked for the host OS.

use path_clean::PathClean;
use std::path::{Path, PathBuf};

use super::settings::{ExternalServer, Settings, ShellOverride, TransportKind};

/// Backend executable, optionally run through `bundle exec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommand {
    pub program: String,
    pub bundler: Option<String>,
}

impl BackendCommand {
    /// Full argument vector for running the backend with `args`.
    pub fn argv<S: AsRef<str>>(&self, args: &[S]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 3);
        if let Some(bundler) = &self.bundler {
            argv.push(bundler.clone());
            argv.push("exec".to_string());
        }
        argv.push(self.program.clone());
        argv.extend(args.iter().map(|arg| arg.as_ref().to_string()));
        argv
    }

    /// The executable that must exist for a spawn to succeed.
    pub fn entry_point(&self) -> &str {
        self.bundler.as_deref().unwrap_or(&self.program)
    }
}

/// Shell used to run backend and maintenance commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub path: String,
    pub args: Vec<String>,
}

impl ShellCommand {
    /// Default shell for the host OS.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self {
                path: "cmd.exe".to_string(),
                args: vec!["/d".to_string(), "/s".to_string(), "/c".to_string()],
            }
        } else {
            Self {
                path: "/bin/sh".to_string(),
                args: vec!["-c".to_string()],
            }
        }
    }

    fn from_override(shell: &ShellOverride) -> Self {
        Self {
            path: shell.path.clone(),
            args: shell.args.clone(),
        }
    }

    /// Join `argv` into one command line quoted for this shell.
    pub fn command_line(&self, argv: &[String]) -> String {
        let windows = self.path.to_ascii_lowercase().ends_with("cmd.exe");
        argv.iter()
            .map(|arg| {
                if windows {
                    quote_cmd(arg)
                } else {
                    quote_posix(arg)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build a process command running `argv` through this shell.
    pub fn command(&self, argv: &[String]) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.path);
        command.args(&self.args).arg(self.command_line(argv));
        command
    }

    /// Like [`command`](Self::command), but a POSIX shell `exec`s the program
    /// so the spawned pid is the backend's own.
    pub fn exec_command(&self, argv: &[String]) -> tokio::process::Command {
        if !self.is_posix() {
            return self.command(argv);
        }
        let mut command = tokio::process::Command::new(&self.path);
        command
            .args(&self.args)
            .arg(format!("exec {}", self.command_line(argv)));
        command
    }

    fn is_posix(&self) -> bool {
        let name = std::path::Path::new(&self.path)
            .file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        matches!(name.as_str(), "sh" | "bash" | "zsh" | "dash" | "ksh")
    }
}

fn quote_posix(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn quote_cmd(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"', '&', '|', '<', '>', '^']) {
        arg.to_string()
    } else {
        format!("\"{}\"", arg.replace('"', "\"\""))
    }
}

/// Snapshot handed to each bridge at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub command: BackendCommand,
    pub shell: ShellCommand,
    pub transport: TransportKind,
    pub external: ExternalServer,
    pub views_path: Option<PathBuf>,
    pub workspace_roots: Vec<PathBuf>,
    pub with_snippets: bool,
    pub check_gem_version: bool,
    pub auto_restart: bool,
    pub settings: Settings,
}

impl Configuration {
    /// Resolve `settings` against the given workspace roots.
    pub fn resolve(settings: Settings, workspace_roots: Vec<PathBuf>) -> Self {
        let primary = workspace_roots.first().map(PathBuf::as_path);
        let program = resolve_command_path(&settings.command_path, primary);
        let bundler = settings.use_bundler.then(|| {
            resolve_command_path(&settings.bundler_path, primary)
        });
        let shell = settings
            .shell
            .as_ref()
            .map(ShellCommand::from_override)
            .unwrap_or_else(ShellCommand::platform_default);

        Self {
            command: BackendCommand { program, bundler },
            shell,
            transport: settings.transport,
            external: settings.external_server.clone(),
            views_path: settings.views_path.clone(),
            workspace_roots,
            with_snippets: settings.with_snippets,
            check_gem_version: settings.check_gem_version,
            auto_restart: settings.auto_restart,
            settings,
        }
    }

    /// Primary workspace root; backend processes run here.
    pub fn workspace(&self) -> Option<&Path> {
        self.workspace_roots.first().map(PathBuf::as_path)
    }

    /// Workspace root containing `document`: the deepest matching root,
    /// else the primary one.
    pub fn workspace_for(&self, document: &Path) -> Option<&Path> {
        self.workspace_roots
            .iter()
            .filter(|root| document.starts_with(root))
            .max_by_key(|root| root.components().count())
            .or_else(|| self.workspace_roots.first())
            .map(PathBuf::as_path)
    }

    /// Process command for running the backend with `args` in the workspace.
    pub fn backend_command<S: AsRef<str>>(&self, args: &[S]) -> tokio::process::Command {
        let mut command = self.shell.exec_command(&self.command.argv(args));
        if let Some(workspace) = self.workspace() {
            command.current_dir(workspace);
        }
        command
    }

    /// Whether moving to `next` requires replacing the running bridge.
    ///
    /// Snippets, version checks and auto-restart are read per use, so they
    /// apply without a restart.
    pub fn requires_restart(&self, next: &Configuration) -> bool {
        self.command != next.command
            || self.shell != next.shell
            || self.transport != next.transport
            || self.external != next.external
            || self.views_path != next.views_path
            || self.workspace_roots != next.workspace_roots
            || self.settings.log_level != next.settings.log_level
    }

    /// Options sent with `initialize`.
    pub fn initialization_options(&self) -> serde_json::Value {
        let mut options = self.settings.to_initialization_options();
        if let serde_json::Value::Object(map) = &mut options {
            map.insert("enablePages".to_string(), serde_json::Value::Bool(true));
            map.insert(
                "viewsPath".to_string(),
                self.views_path
                    .as_ref()
                    .map(|path| serde_json::Value::String(path.display().to_string()))
                    .unwrap_or(serde_json::Value::Null),
            );
        }
        options
    }
}

/// Resolve a configured command path.
///
/// - absolute paths are used as-is
/// - bare names are looked up on PATH, falling back to the bare name so the
///   shell can report a missing command
/// - other relative paths are made absolute against the workspace
pub fn resolve_command_path(command: &str, workspace: Option<&Path>) -> String {
    let path = Path::new(command);
    if path.is_absolute() {
        return command.to_string();
    }
    if path.components().count() == 1 {
        return find_on_path(command)
            .map(|found| found.display().to_string())
            .unwrap_or_else(|| command.to_string());
    }
    let base = workspace
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default();
    base.join(path).clean().display().to_string()
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    let extensions: Vec<String> = if cfg!(windows) {
        std::env::var("PATHEXT")
            .unwrap_or_else(|_| ".EXE;.BAT;.CMD".to_string())
            .split(';')
            .map(str::to_string)
            .collect()
    } else {
        vec![String::new()]
    };

    std::env::split_paths(&paths).find_map(|dir| {
        extensions.iter().find_map(|ext| {
            let candidate = dir.join(format!("{}{}", name, ext));
            candidate.is_file().then_some(candidate)
        })
    })
}
