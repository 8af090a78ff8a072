//! Error handling types for solargraph-bridge
//!
//! The variants mirror how a failure is remediated in the editor: a missing
//! backend is installed, an outdated one is updated, transport failures are
//! reported, and single request failures are logged and dropped.

use std::sync::PoisonError;
use thiserror::Error;

/// Comprehensive error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Backend executable (or the bundler wrapping it) could not be located
    #[error("Backend not found: {command}")]
    BackendMissing { command: String },

    /// Backend rejected a subcommand this client relies on
    #[error("Backend is outdated: {message}")]
    BackendOutdated { message: String },

    /// Socket refused/timed out, or the process died before signaling ready
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Request issued before the initialize handshake completed
    #[error("Bridge is not ready")]
    NotReady,

    /// A single protocol request failed
    #[error("Request {method} failed: {message}")]
    RequestFailed { method: String, message: String },

    /// User dismissed an interactive prompt
    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Helper trait to convert PoisonError into a recovered guard
pub trait LockResultExt<T> {
    /// Recover the guard of a poisoned lock, logging which operation hit it.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "solargraph_bridge::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}

/// Helper functions for common error patterns
impl BridgeError {
    /// Create a backend missing error
    pub fn backend_missing(command: impl Into<String>) -> Self {
        BridgeError::BackendMissing {
            command: command.into(),
        }
    }

    /// Create a backend outdated error
    pub fn backend_outdated(message: impl Into<String>) -> Self {
        BridgeError::BackendOutdated {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        BridgeError::Transport {
            message: message.into(),
        }
    }

    /// Create a request failure for `method`
    pub fn request_failed(method: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::RequestFailed {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        BridgeError::Cancelled {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// Whether the failure means the backend must be installed or upgraded
    /// before another start can succeed.
    pub fn needs_remediation(&self) -> bool {
        matches!(
            self,
            BridgeError::BackendMissing { .. } | BridgeError::BackendOutdated { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn backend_errors_need_remediation() {
        assert!(BridgeError::backend_missing("solargraph").needs_remediation());
        assert!(BridgeError::backend_outdated("socket").needs_remediation());
        assert!(!BridgeError::transport("refused").needs_remediation());
        assert!(!BridgeError::NotReady.needs_remediation());
    }

    #[test]
    fn display_includes_context() {
        let err = BridgeError::request_failed("hover", "boom");
        assert_eq!(err.to_string(), "Request hover failed: boom");

        let err = BridgeError::backend_missing("/opt/solargraph");
        assert_eq!(err.to_string(), "Backend not found: /opt/solargraph");
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let lock = std::sync::Arc::new(Mutex::new(1));
        let cloned = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        let guard = lock.lock().recover_poison("test");
        assert_eq!(*guard, 1);
    }
}
