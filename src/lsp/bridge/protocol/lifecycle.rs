//! LSP lifecycle message builders and initialize-result inspection.

use std::path::PathBuf;

use serde_json::{Value, json};
use url::Url;

use super::request_id::RequestId;

/// Oldest backend version whose protocol this bridge fully supports.
pub const MINIMUM_BACKEND_VERSION: &str = "0.44.0";

/// Build the `initialize` request.
pub(crate) fn build_initialize_request(
    request_id: RequestId,
    initialization_options: Value,
    workspace_roots: &[PathBuf],
    with_snippets: bool,
) -> Value {
    let folders: Vec<Value> = workspace_roots
        .iter()
        .filter_map(|root| {
            let uri = Url::from_directory_path(root).ok()?;
            let name = root
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| root.display().to_string());
            Some(json!({ "uri": uri.as_str(), "name": name }))
        })
        .collect();
    let root_uri = folders
        .first()
        .and_then(|folder| folder.get("uri").cloned())
        .unwrap_or(Value::Null);
    let root_path = workspace_roots
        .first()
        .map(|root| Value::String(root.display().to_string()))
        .unwrap_or(Value::Null);
    let workspace_folders = if folders.is_empty() {
        Value::Null
    } else {
        Value::Array(folders)
    };

    json!({
        "jsonrpc": "2.0",
        "id": request_id.as_i64(),
        "method": "initialize",
        "params": {
            "processId": std::process::id(),
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            },
            "rootPath": root_path,
            "rootUri": root_uri,
            "workspaceFolders": workspace_folders,
            "capabilities": {
                "textDocument": {
                    "hover": { "contentFormat": ["markdown", "plaintext"] },
                    "completion": {
                        "completionItem": {
                            "snippetSupport": with_snippets,
                            "documentationFormat": ["markdown", "plaintext"],
                            "resolveSupport": { "properties": ["documentation", "detail"] }
                        }
                    },
                    "signatureHelp": {
                        "signatureInformation": { "documentationFormat": ["markdown", "plaintext"] }
                    }
                },
                "window": { "showMessage": { "messageActionItem": { "additionalPropertiesSupport": false } } }
            },
            "initializationOptions": initialization_options
        }
    })
}

pub(crate) fn build_initialized_notification() -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "initialized",
        "params": {}
    })
}

pub(crate) fn build_shutdown_request(request_id: RequestId) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": request_id.as_i64(),
        "method": "shutdown",
        "params": null
    })
}

pub(crate) fn build_exit_notification() -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "exit",
        "params": null
    })
}

/// Validate an initialize response and return its result.
///
/// An error member wins over a result; a null or missing result is rejected.
pub(crate) fn validate_initialize_response(response: &Value) -> Result<&Value, String> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(format!("initialize failed (code {}): {}", code, message));
    }

    response
        .get("result")
        .filter(|r| !r.is_null())
        .ok_or_else(|| "initialize response missing valid result".to_string())
}

/// `serverInfo.version` of an initialize result.
pub(crate) fn server_version(result: &Value) -> Option<&str> {
    result.get("serverInfo")?.get("version")?.as_str()
}

/// Compare dotted versions numerically. Pre-release suffixes are ignored.
/// Unparseable versions are never considered older.
pub fn is_older_than(version: &str, minimum: &str) -> bool {
    match (parse_version(version), parse_version(minimum)) {
        (Some(version), Some(minimum)) => version < minimum,
        _ => false,
    }
}

fn parse_version(version: &str) -> Option<Vec<u64>> {
    let mut parts: Vec<u64> = version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse::<u64>().ok()
        })
        .collect::<Option<_>>()?;
    while parts.last() == Some(&0) && parts.len() > 1 {
        parts.pop();
    }
    Some(parts)
}
