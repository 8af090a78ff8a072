pub mod config;
pub mod error;
pub mod host;
pub mod lsp;

// Re-export the types an editor integration needs
pub use config::{Configuration, Settings, TransportKind};
pub use error::{BridgeError, BridgeResult};
pub use host::{EditorHost, MessageKind};
pub use lsp::{Command, LifecycleController};
