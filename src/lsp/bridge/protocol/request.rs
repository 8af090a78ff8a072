//! Request builders for backend communication.
//!
//! The backend answers a small set of custom methods that take the whole
//! source text plus a cursor position instead of an open-document model.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Value, json};

use super::request_id::RequestId;

pub(crate) const SUGGEST: &str = "suggest";
pub(crate) const HOVER: &str = "hover";
pub(crate) const SIGNIFY: &str = "signify";
pub(crate) const DEFINE: &str = "define";
pub(crate) const RESOLVE: &str = "resolve";

pub(crate) const CHECK_GEM_VERSION: &str = "$/solargraph/checkGemVersion";
pub(crate) const DOCUMENT_GEMS: &str = "$/solargraph/documentGems";
pub(crate) const DOWNLOAD_CORE: &str = "$/solargraph/downloadCore";

/// Positional parameters shared by `suggest`, `hover`, `signify` and `define`.
///
/// `line` and `column` are zero-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionParams {
    pub text: String,
    pub line: u32,
    pub column: u32,
    pub filename: PathBuf,
    pub workspace: Option<PathBuf>,
    pub with_snippets: bool,
}

impl PositionParams {
    pub fn new(text: impl Into<String>, line: u32, column: u32, filename: impl AsRef<Path>) -> Self {
        Self {
            text: text.into(),
            line,
            column,
            filename: filename.as_ref().to_path_buf(),
            workspace: None,
            with_snippets: false,
        }
    }

    pub fn with_workspace(mut self, workspace: Option<PathBuf>) -> Self {
        self.workspace = workspace;
        self
    }

    pub fn with_snippets(mut self, with_snippets: bool) -> Self {
        self.with_snippets = with_snippets;
        self
    }

    pub(crate) fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Build a JSON-RPC request.
pub(crate) fn build_request(request_id: RequestId, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": request_id.as_i64(),
        "method": method,
        "params": params
    })
}

/// Build a JSON-RPC notification.
pub(crate) fn build_notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    })
}

/// Build the response to a server-initiated request.
///
/// `id` is echoed verbatim since servers may use string ids.
pub(crate) fn build_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

/// Build an error response to a server-initiated request.
pub(crate) fn build_error_response(id: Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

/// Params for the `resolve` lookup by cross-reference path.
pub(crate) fn resolve_params(path: &str, workspace: Option<&Path>) -> Value {
    json!({
        "path": path,
        "workspace": workspace.map(|w| w.display().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_params_serialize_camel_case() {
        let params = PositionParams::new("foo.", 0, 4, "/work/app/a.rb")
            .with_workspace(Some(PathBuf::from("/work/app")))
            .with_snippets(true)
            .to_value();

        assert_eq!(params["text"], "foo.");
        assert_eq!(params["line"], 0);
        assert_eq!(params["column"], 4);
        assert_eq!(params["filename"], "/work/app/a.rb");
        assert_eq!(params["workspace"], "/work/app");
        assert_eq!(params["withSnippets"], true);
    }

    #[test]
    fn request_and_notification_shapes() {
        let request = build_request(RequestId::new(5), SUGGEST, json!({}));
        assert_eq!(request["id"], 5);
        assert_eq!(request["method"], "suggest");

        let notification = build_notification(CHECK_GEM_VERSION, json!({ "verbose": true }));
        assert!(notification.get("id").is_none());
        assert_eq!(notification["params"]["verbose"], true);
    }

    #[test]
    fn response_echoes_string_id() {
        let response = build_response(json!("abc"), json!({ "title": "OK" }));
        assert_eq!(response["id"], "abc");
        assert_eq!(response["result"]["title"], "OK");
    }

    #[test]
    fn resolve_params_without_workspace() {
        let params = resolve_params("String#upcase", None);
        assert_eq!(params["path"], "String#upcase");
        assert!(params["workspace"].is_null());
    }
}
