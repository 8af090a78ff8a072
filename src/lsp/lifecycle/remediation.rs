//! Install and update prompts for a missing or outdated backend.

use log::{info, warn};

use crate::config::Configuration;
use crate::error::BridgeError;
use crate::host::{EditorHost, MessageKind};
use crate::lsp::transport::launch::run_shell;

const GEM: &str = "gem";
const GEM_NAME: &str = "solargraph";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    Install,
    Update,
}

impl Remediation {
    /// The remediation a start failure calls for, if any.
    pub fn for_error(error: &BridgeError) -> Option<Self> {
        match error {
            BridgeError::BackendMissing { .. } => Some(Remediation::Install),
            BridgeError::BackendOutdated { .. } => Some(Remediation::Update),
            _ => None,
        }
    }

    /// Label of the action offered to the user.
    pub fn action(self) -> &'static str {
        match self {
            Remediation::Install => "Install",
            Remediation::Update => "Update",
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            Remediation::Install => "installed",
            Remediation::Update => "updated",
        }
    }

    /// Command line that performs the remediation.
    ///
    /// Under bundler the Gemfile decides which version is used, so the
    /// bundler equivalents are run instead of `gem`.
    pub fn command(self, config: &Configuration) -> Vec<String> {
        match (self, config.command.bundler.as_deref()) {
            (Remediation::Install, Some(bundler)) => vec![bundler.to_string(), "install".to_string()],
            (Remediation::Update, Some(bundler)) => vec![
                bundler.to_string(),
                "update".to_string(),
                GEM_NAME.to_string(),
            ],
            (Remediation::Install, None) => vec![
                GEM.to_string(),
                "install".to_string(),
                GEM_NAME.to_string(),
            ],
            (Remediation::Update, None) => vec![
                GEM.to_string(),
                "update".to_string(),
                GEM_NAME.to_string(),
            ],
        }
    }
}

/// Ask the user to run `remediation`, and run it if they agree.
///
/// Returns `true` only when the command ran and succeeded.
pub async fn offer<H: EditorHost>(
    host: &H,
    config: &Configuration,
    remediation: Remediation,
    message: &str,
) -> bool {
    let action = remediation.action().to_string();
    let choice = host
        .show_message(MessageKind::Warning, message, std::slice::from_ref(&action))
        .await;
    if choice.as_deref() != Some(action.as_str()) {
        info!(
            target: "solargraph_bridge::lifecycle",
            "{} declined",
            action
        );
        return false;
    }

    let argv = remediation.command(config);
    host.set_status(&format!("Running {}", argv.join(" ")));
    match run_shell(config, &argv).await {
        Ok(output) if output.success => {
            host.show_message(
                MessageKind::Info,
                &format!("Successfully {} the Solargraph gem.", remediation.past_tense()),
                &[],
            )
            .await;
            true
        }
        Ok(output) => {
            let detail = output.stderr.trim();
            warn!(
                target: "solargraph_bridge::lifecycle",
                "`{}` failed with {:?}",
                argv.join(" "),
                output.code
            );
            host.show_message(
                MessageKind::Error,
                &format!("`{}` failed: {}", argv.join(" "), detail),
                &[],
            )
            .await;
            false
        }
        Err(e) => {
            host.show_message(
                MessageKind::Error,
                &format!("`{}` could not be run: {}", argv.join(" "), e),
                &[],
            )
            .await;
            false
        }
    }
}
