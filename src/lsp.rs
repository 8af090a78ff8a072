pub mod bridge;
pub mod content_cache;
pub mod format;
pub(crate) mod in_progress_set;
pub mod lifecycle;
pub mod rewriter;
pub mod supervisor;
pub mod transport;
pub mod virtual_uri;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use bridge::{BridgeEvent, BridgeState, ProtocolBridge};
pub use content_cache::{ContentCache, PageSource};
pub use lifecycle::{Command, LifecycleController};
pub use supervisor::{LaunchMode, ProcessSupervisor};
pub use transport::{TransportHandle, TransportSelector};
pub use virtual_uri::VirtualDocumentUri;
