//! JSON-RPC request ID type for bridge communication.

/// Numeric JSON-RPC request ID.
///
/// The bridge generates every outgoing ID itself, so only numeric IDs are
/// issued. Server-initiated requests may use strings; those are echoed back
/// verbatim as `serde_json::Value` and never enter the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RequestId(i64);

impl RequestId {
    /// ID reserved for the `initialize` request.
    pub(crate) const INITIALIZE: RequestId = RequestId(1);

    #[inline]
    pub(crate) fn new(id: i64) -> Self {
        Self(id)
    }

    #[inline]
    pub(crate) fn as_i64(self) -> i64 {
        self.0
    }

    /// Extract the ID from a JSON-RPC message; `None` for notifications or
    /// non-numeric IDs.
    pub(crate) fn from_json(message: &serde_json::Value) -> Option<Self> {
        message.get("id")?.as_i64().map(Self)
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
