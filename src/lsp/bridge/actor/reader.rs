//! Reader task for the backend's output stream.
//!
//! The reader task:
//! - Runs in a spawned tokio task
//! - Routes responses via ResponseRouter to oneshot waiters
//! - Forwards notifications and server-initiated requests as `BridgeEvent`s
//! - On EOF or read error fails every pending request, marks the bridge
//!   disconnected and reports `BridgeEvent::Disconnected`
//! - Stops silently when cancelled

use std::sync::{Arc, RwLock};

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::super::connection::BridgeReader;
use super::super::error_types::ResponseError;
use super::super::state::BridgeState;
use super::ResponseRouter;
use crate::error::LockResultExt;

/// Message from the backend that is not a response to one of our requests.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Notification {
        method: String,
        params: Value,
    },
    /// Request initiated by the backend; answer with `ProtocolBridge::respond`.
    ServerRequest {
        id: Value,
        method: String,
        params: Value,
    },
    /// Transport lost without a shutdown having been requested.
    Disconnected { reason: String },
}

/// Handle to a running reader task.
///
/// Dropping the handle cancels the task.
pub(crate) struct ReaderTaskHandle {
    join_handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl ReaderTaskHandle {
    /// Stop reading without reporting a disconnect.
    pub(crate) fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

impl Drop for ReaderTaskHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

pub(crate) fn spawn_reader_task(
    reader: BridgeReader,
    router: Arc<ResponseRouter>,
    state: Arc<RwLock<BridgeState>>,
    events: mpsc::UnboundedSender<BridgeEvent>,
) -> ReaderTaskHandle {
    let cancel_token = CancellationToken::new();
    let join_handle = tokio::spawn(reader_loop(
        reader,
        router,
        state,
        events,
        cancel_token.clone(),
    ));

    ReaderTaskHandle {
        join_handle,
        cancel_token,
    }
}

async fn reader_loop(
    mut reader: BridgeReader,
    router: Arc<ResponseRouter>,
    state: Arc<RwLock<BridgeState>>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                debug!(
                    target: "solargraph_bridge::bridge::reader",
                    "Reader task cancelled, shutting down"
                );
                break;
            }

            result = reader.read_message() => {
                match result {
                    Ok(message) => handle_message(message, &router, &events),
                    Err(e) => {
                        if cancel_token.is_cancelled() {
                            break;
                        }
                        warn!(
                            target: "solargraph_bridge::bridge::reader",
                            "Reader error: {}, failing pending requests",
                            e
                        );
                        *state.write().recover_poison("reader task") = BridgeState::Disconnected;
                        router.fail_all(&ResponseError::internal(format!(
                            "bridge: connection lost: {}",
                            e
                        )));
                        let _ = events.send(BridgeEvent::Disconnected {
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
            }
        }
    }
}

/// Classify and dispatch one incoming message.
fn handle_message(
    message: Value,
    router: &ResponseRouter,
    events: &mpsc::UnboundedSender<BridgeEvent>,
) {
    let method = message
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_string);
    let id = message.get("id").filter(|id| !id.is_null()).cloned();

    match (method, id) {
        (Some(method), Some(id)) => {
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            let _ = events.send(BridgeEvent::ServerRequest { id, method, params });
        }
        (Some(method), None) => {
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            let _ = events.send(BridgeEvent::Notification { method, params });
        }
        (None, Some(_)) => {
            if !router.route(message) {
                debug!(
                    target: "solargraph_bridge::bridge::reader",
                    "Response for unknown request ID, dropping"
                );
            }
        }
        (None, None) => {
            debug!(
                target: "solargraph_bridge::bridge::reader",
                "Ignoring message without id or method: {}",
                message
            );
        }
    }
}
