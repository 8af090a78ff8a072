//! Editor UI surface used by the bridge.
//!
//! The bridge never renders anything itself; status text, notifications,
//! prompts and documentation views all go through an [`EditorHost`].

use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Warning,
    Error,
}

pub trait EditorHost: Send + Sync + 'static {
    /// Replace the status-bar text.
    fn set_status(&self, text: &str);

    /// Show a non-blocking notification offering `actions`.
    ///
    /// Resolves to the chosen action, or `None` when dismissed.
    fn show_message(
        &self,
        kind: MessageKind,
        message: &str,
        actions: &[String],
    ) -> impl Future<Output = Option<String>> + Send;

    /// Ask for a line of free text. `None` when the user cancels.
    fn prompt_input(&self, prompt: &str) -> impl Future<Output = Option<String>> + Send;

    /// Ask whether a failed connection attempt should be retried.
    fn confirm_retry(&self, message: &str) -> impl Future<Output = bool> + Send;

    /// Open (or focus) the view for a documentation page.
    fn open_document(&self, uri: &str, title: &str);
}
