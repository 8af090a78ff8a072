//! JSON-RPC error objects exchanged with the backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// LSP error codes used by the bridge.
pub struct ErrorCodes;

impl ErrorCodes {
    /// Request failed but was syntactically correct (LSP 3.17)
    pub const REQUEST_FAILED: i32 = -32803;

    /// Server cancelled the request (LSP 3.17)
    pub const SERVER_CANCELLED: i32 = -32802;

    /// Server not initialized (JSON-RPC reserved)
    pub const SERVER_NOT_INITIALIZED: i32 = -32002;

    /// Method not found (JSON-RPC reserved)
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Error member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn request_failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCodes::REQUEST_FAILED,
            message: message.into(),
            data: None,
        }
    }

    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCodes::SERVER_NOT_INITIALIZED,
            message: message.into(),
            data: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCodes::INTERNAL_ERROR,
            message: message.into(),
            data: None,
        }
    }

    /// Error delivered to requests left pending on a replaced bridge.
    pub fn superseded() -> Self {
        Self {
            code: ErrorCodes::SERVER_CANCELLED,
            message: "bridge: request superseded by restart".to_string(),
            data: Some(serde_json::json!({ "reason": "superseded" })),
        }
    }

    /// Extract the error member from a response message, if it has one.
    pub fn from_response(response: &Value) -> Option<Self> {
        let error = response.get("error").filter(|e| !e.is_null())?;
        Some(serde_json::from_value(error.clone()).unwrap_or_else(|_| {
            Self::internal(format!("malformed error object: {}", error))
        }))
    }

    /// Whether this error marks a request abandoned by a restart.
    pub fn is_superseded(&self) -> bool {
        self.code == ErrorCodes::SERVER_CANCELLED
            && self
                .data
                .as_ref()
                .and_then(|data| data.get("reason"))
                .and_then(Value::as_str)
                == Some("superseded")
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}
