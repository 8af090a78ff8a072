//! Spawning backend processes and one-shot maintenance commands.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Child;

use crate::config::Configuration;
use crate::error::{BridgeError, BridgeResult};

/// Output of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Fail early when an explicitly configured path does not exist.
///
/// Bare names are left to PATH resolution by the shell; its "not found"
/// output is classified later.
fn ensure_entry_point(config: &Configuration) -> BridgeResult<()> {
    let entry = config.command.entry_point();
    let path = Path::new(entry);
    if path.components().count() > 1 && !path.exists() {
        return Err(BridgeError::backend_missing(entry));
    }
    Ok(())
}

fn map_spawn_error(config: &Configuration, err: std::io::Error) -> BridgeError {
    if err.kind() == std::io::ErrorKind::NotFound {
        // The shell itself is missing, or the backend when no shell wraps it.
        BridgeError::backend_missing(format!(
            "{} (via {})",
            config.command.entry_point(),
            config.shell.path
        ))
    } else {
        BridgeError::Io(err)
    }
}

/// Spawn the long-running backend with piped stdio.
pub(crate) fn spawn_backend(config: &Configuration, args: &[&str]) -> BridgeResult<Child> {
    ensure_entry_point(config)?;

    let mut command = config.backend_command(args);
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    log::info!(
        target: "solargraph_bridge::transport",
        "Spawning backend: {}",
        config.shell.command_line(&config.command.argv(args))
    );

    command.spawn().map_err(|e| map_spawn_error(config, e))
}

/// Run the backend with `args` to completion (`config`, `download-core`, ...).
pub async fn run_backend(config: &Configuration, args: &[&str]) -> BridgeResult<CommandOutput> {
    ensure_entry_point(config)?;
    let command = config.backend_command(args);
    let display = config.shell.command_line(&config.command.argv(args));
    run(config, command, &display).await
}

/// Run an arbitrary command line through the configured shell in the
/// workspace (`gem install solargraph`, `bundle update solargraph`, ...).
pub async fn run_shell(config: &Configuration, argv: &[String]) -> BridgeResult<CommandOutput> {
    let mut command = config.shell.command(argv);
    if let Some(workspace) = config.workspace() {
        command.current_dir(workspace);
    }
    let display = config.shell.command_line(argv);
    run(config, command, &display).await
}

async fn run(
    config: &Configuration,
    mut command: tokio::process::Command,
    display: &str,
) -> BridgeResult<CommandOutput> {
    log::info!(
        target: "solargraph_bridge::transport",
        "Running: {}",
        display
    );
    let output = command
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| map_spawn_error(config, e))?;

    let result = CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    if !result.success {
        log::warn!(
            target: "solargraph_bridge::transport",
            "`{}` exited with {:?}: {}",
            display,
            result.code,
            result.stderr.trim()
        );
    }
    Ok(result)
}
