//! Response routing for pending backend requests.
//!
//! - Before sending a request, register it via `register(id)` to get a oneshot Receiver
//! - The reader task calls `route(response)` when a response arrives
//! - The requester awaits the Receiver without holding any lock

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use super::super::error_types::ResponseError;
use super::super::protocol::RequestId;
use crate::error::LockResultExt;

/// Routes responses to pending requests via oneshot channels.
///
/// Requests may complete in any order; each waiter only ever sees the
/// response carrying its own id.
pub(crate) struct ResponseRouter {
    pending: std::sync::Mutex<HashMap<RequestId, oneshot::Sender<Value>>>,
}

impl ResponseRouter {
    pub(crate) fn new() -> Self {
        Self {
            pending: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Register a pending request and return a receiver for the response.
    ///
    /// Returns `None` if a request with this ID is already pending.
    pub(crate) fn register(&self, id: RequestId) -> Option<oneshot::Receiver<Value>> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().recover_poison("ResponseRouter::register");

        if pending.contains_key(&id) {
            return None;
        }
        pending.insert(id, tx);
        Some(rx)
    }

    /// Route a response to its pending request.
    ///
    /// Returns `true` if the response was delivered. Responses for unknown
    /// ids (including ones whose waiter already gave up) are dropped.
    pub(crate) fn route(&self, response: Value) -> bool {
        let Some(id) = RequestId::from_json(&response) else {
            return false;
        };

        let tx = self
            .pending
            .lock()
            .recover_poison("ResponseRouter::route")
            .remove(&id);

        match tx {
            Some(sender) => sender.send(response).is_ok(),
            None => false,
        }
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().recover_poison("ResponseRouter::pending_count").len()
    }

    /// Remove a pending request without sending a response.
    ///
    /// Used when the write of a registered request fails.
    pub(crate) fn remove(&self, id: RequestId) -> bool {
        self.pending
            .lock()
            .recover_poison("ResponseRouter::remove")
            .remove(&id)
            .is_some()
    }

    /// Fail all pending requests with the given error.
    pub(crate) fn fail_all(&self, error: &ResponseError) {
        let entries: Vec<_> = self
            .pending
            .lock()
            .recover_poison("ResponseRouter::fail_all")
            .drain()
            .collect();

        let error = error.to_value();
        for (id, tx) in entries {
            let _ = tx.send(serde_json::json!({
                "jsonrpc": "2.0",
                "id": id.as_i64(),
                "error": error
            }));
        }
    }
}
