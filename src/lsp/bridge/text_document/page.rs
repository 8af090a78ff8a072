//! Documentation page content.

use serde_json::Value;

use super::super::ProtocolBridge;
use crate::error::{BridgeError, BridgeResult};
use crate::lsp::rewriter::rewrite;
use crate::lsp::virtual_uri::VirtualDocumentUri;

impl ProtocolBridge {
    /// Render a documentation page. Links in the returned HTML are already
    /// rewritten.
    pub async fn fetch_page(&self, uri: &VirtualDocumentUri) -> BridgeResult<String> {
        let method = uri.method();
        let result = self.request(&method, uri.params()).await?;
        let content = result
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::request_failed(&method, "response has no content"))?;
        Ok(rewrite(content).into_owned())
    }
}
