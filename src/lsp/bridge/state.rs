//! Bridge state machine.

/// State of a protocol bridge.
///
/// Transitions:
/// - Disconnected -> Connecting (on `start`)
/// - Connecting -> Ready (initialize handshake complete)
/// - Connecting -> Disconnected (transport or handshake failure)
/// - Ready -> Degraded (backend older than the minimum known version)
/// - Ready | Degraded -> Disconnected (transport loss or shutdown)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Ready,
    /// Usable, but the backend should be updated
    Degraded,
}

impl BridgeState {
    /// Whether requests may be issued.
    pub fn accepts_requests(self) -> bool {
        matches!(self, BridgeState::Ready | BridgeState::Degraded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BridgeState::Disconnected => "disconnected",
            BridgeState::Connecting => "connecting",
            BridgeState::Ready => "ready",
            BridgeState::Degraded => "degraded",
        }
    }
}
