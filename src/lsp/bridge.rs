//! Protocol bridge to the Ruby analysis backend.
//!
//! One `ProtocolBridge` wraps one `TransportHandle` for the life of a
//! connection. A restart builds a fresh bridge; the old one is shut down and
//! every request still pending on it resolves as superseded.
//!
//! # Module Structure
//!
//! - `actor` - ResponseRouter and the reader task
//! - `connection` - Content-Length framing over the transport streams
//! - `error_types` - JSON-RPC error objects
//! - `protocol` - request builders, lifecycle messages, suggestion records
//! - `state` - BridgeState machine
//! - `text_document` - completion, hover, signature help, definition, pages

mod actor;
pub(crate) mod connection;
mod error_types;
mod protocol;
mod state;
mod text_document;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::config::Configuration;
use crate::error::{BridgeError, BridgeResult, LockResultExt};
use crate::lsp::supervisor::ProcessSupervisor;
use crate::lsp::transport::TransportHandle;
use actor::{ReaderTaskHandle, ResponseRouter, spawn_reader_task};
use connection::{BridgeReader, BridgeWriter};

pub use actor::BridgeEvent;
pub use error_types::{ErrorCodes, ResponseError};
pub use protocol::{Documentation, MINIMUM_BACKEND_VERSION, PositionParams, Suggestion, is_older_than};
pub use state::BridgeState;
pub use text_document::{DefinitionLocation, completion_kind, replacement_range};

use protocol::RequestId;

/// Receiver for messages the backend sends on its own initiative.
pub type BridgeEvents = mpsc::UnboundedReceiver<BridgeEvent>;

/// Time allowed for the initialize handshake.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the backend to answer `shutdown`.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side of one backend connection.
///
/// Request flow:
/// 1. Register request ID with router to get oneshot receiver
/// 2. Lock writer, send request, release lock
/// 3. Await oneshot receiver (no lock held)
pub struct ProtocolBridge {
    /// Snapshot taken when the bridge was built
    config: Arc<Configuration>,
    /// Shared with the reader task, which flips it to Disconnected on EOF
    state: Arc<RwLock<BridgeState>>,
    writer: tokio::sync::Mutex<BridgeWriter>,
    router: Arc<ResponseRouter>,
    reader_handle: ReaderTaskHandle,
    supervisor: tokio::sync::Mutex<Option<ProcessSupervisor>>,
    /// Starts at 2; id 1 belongs to `initialize`
    next_request_id: AtomicI64,
    server_version: Option<String>,
    port: Option<u16>,
    pid: Option<u32>,
}

impl std::fmt::Debug for ProtocolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolBridge")
            .field("state", &self.state())
            .field("server_version", &self.server_version)
            .field("port", &self.port)
            .field("pid", &self.pid)
            .finish()
    }
}

impl ProtocolBridge {
    /// Perform the initialize handshake over an established transport.
    ///
    /// On failure the transport is closed and any supervised process is
    /// stopped before the error is returned.
    pub async fn start(
        config: Arc<Configuration>,
        transport: TransportHandle,
    ) -> BridgeResult<(Self, BridgeEvents)> {
        Self::start_with_timeout(config, transport, INIT_TIMEOUT).await
    }

    pub(crate) async fn start_with_timeout(
        config: Arc<Configuration>,
        transport: TransportHandle,
        init_timeout: Duration,
    ) -> BridgeResult<(Self, BridgeEvents)> {
        let TransportHandle {
            reader,
            writer,
            supervisor,
            port,
            pid,
        } = transport;

        let state = Arc::new(RwLock::new(BridgeState::Connecting));
        let router = Arc::new(ResponseRouter::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reader_handle = spawn_reader_task(
            BridgeReader::new(reader),
            Arc::clone(&router),
            Arc::clone(&state),
            events_tx,
        );

        let mut bridge = Self {
            config,
            state,
            writer: tokio::sync::Mutex::new(BridgeWriter::new(writer)),
            router,
            reader_handle,
            supervisor: tokio::sync::Mutex::new(supervisor),
            next_request_id: AtomicI64::new(2),
            server_version: None,
            port,
            pid,
        };

        match tokio::time::timeout(init_timeout, bridge.handshake()).await {
            Ok(Ok(version)) => {
                bridge.server_version = version;
                let next_state = match bridge.server_version.as_deref() {
                    Some(version) if is_older_than(version, MINIMUM_BACKEND_VERSION) => {
                        warn!(
                            target: "solargraph_bridge::bridge",
                            "Backend {} is older than {}; some features may not work",
                            version,
                            MINIMUM_BACKEND_VERSION
                        );
                        BridgeState::Degraded
                    }
                    _ => BridgeState::Ready,
                };
                if !bridge.transition(BridgeState::Connecting, next_state) {
                    bridge.close().await;
                    return Err(BridgeError::transport(
                        "connection lost during initialize",
                    ));
                }
                info!(
                    target: "solargraph_bridge::bridge",
                    "Bridge {} (backend version {})",
                    next_state.as_str(),
                    bridge.server_version.as_deref().unwrap_or("unknown")
                );
                Ok((bridge, events_rx))
            }
            Ok(Err(e)) => {
                bridge.close().await;
                Err(e)
            }
            Err(_) => {
                bridge.close().await;
                Err(BridgeError::transport(format!(
                    "backend did not answer initialize within {:?}",
                    init_timeout
                )))
            }
        }
    }

    /// Send `initialize` and `initialized`; returns the reported backend version.
    async fn handshake(&self) -> BridgeResult<Option<String>> {
        let request = protocol::build_initialize_request(
            RequestId::INITIALIZE,
            self.config.initialization_options(),
            &self.config.workspace_roots,
            self.config.with_snippets,
        );
        let response = self
            .send_and_wait(RequestId::INITIALIZE, "initialize", &request)
            .await?;
        let result = protocol::validate_initialize_response(&response)
            .map_err(BridgeError::transport)?;
        let version = protocol::server_version(result).map(str::to_string);

        self.write(&protocol::build_initialized_notification())
            .await
            .map_err(|e| BridgeError::transport(format!("failed to send initialized: {}", e)))?;
        Ok(version)
    }

    pub fn state(&self) -> BridgeState {
        *self.state.read().recover_poison("ProtocolBridge::state")
    }

    fn set_state(&self, next: BridgeState) {
        *self.state.write().recover_poison("ProtocolBridge::set_state") = next;
    }

    /// Move from `from` to `to`; fails if another task changed the state.
    fn transition(&self, from: BridgeState, to: BridgeState) -> bool {
        let mut state = self.state.write().recover_poison("ProtocolBridge::transition");
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    /// Version from the initialize result's `serverInfo`.
    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.router.pending_count()
    }

    fn ensure_ready(&self) -> BridgeResult<()> {
        if self.state().accepts_requests() {
            Ok(())
        } else {
            Err(BridgeError::NotReady)
        }
    }

    fn next_id(&self) -> RequestId {
        RequestId::new(self.next_request_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn write(&self, message: &Value) -> std::io::Result<()> {
        self.writer.lock().await.write_message(message).await
    }

    /// Register, write and wait for one request.
    ///
    /// Returns the raw response message, error member included.
    async fn send_and_wait(
        &self,
        id: RequestId,
        method: &str,
        message: &Value,
    ) -> BridgeResult<Value> {
        let rx = self.router.register(id).ok_or_else(|| {
            BridgeError::request_failed(method, format!("duplicate request id {}", id))
        })?;

        if let Err(e) = self.write(message).await {
            self.router.remove(id);
            return Err(BridgeError::request_failed(
                method,
                format!("failed to write request: {}", e),
            ));
        }

        rx.await
            .map_err(|_| BridgeError::request_failed(method, "connection closed before response"))
    }

    /// Issue a request and return its result.
    ///
    /// A failed request only rejects itself; the bridge stays up.
    pub async fn request(&self, method: &str, params: Value) -> BridgeResult<Value> {
        self.ensure_ready()?;

        let id = self.next_id();
        debug!(
            target: "solargraph_bridge::bridge",
            "Request {} {}",
            id,
            method
        );
        let message = protocol::build_request(id, method, params);
        let response = self.send_and_wait(id, method, &message).await?;

        match ResponseError::from_response(&response) {
            Some(error) if error.is_superseded() => Err(BridgeError::cancelled(format!(
                "{} superseded by restart",
                method
            ))),
            Some(error) => Err(BridgeError::request_failed(method, error.to_string())),
            None => Ok(response.get("result").cloned().unwrap_or(Value::Null)),
        }
    }

    pub async fn notify(&self, method: &str, params: Value) -> BridgeResult<()> {
        self.ensure_ready()?;
        self.write(&protocol::build_notification(method, params))
            .await
            .map_err(|e| BridgeError::request_failed(method, format!("failed to write notification: {}", e)))
    }

    /// Answer a server-initiated request.
    pub async fn respond(&self, id: Value, result: Value) -> BridgeResult<()> {
        self.ensure_ready()?;
        self.write(&protocol::build_response(id, result))
            .await
            .map_err(|e| BridgeError::transport(format!("failed to write response: {}", e)))
    }

    /// Reject a server-initiated request the bridge cannot serve.
    pub async fn respond_error(&self, id: Value, code: i32, message: &str) -> BridgeResult<()> {
        self.ensure_ready()?;
        self.write(&protocol::build_error_response(id, code, message))
            .await
            .map_err(|e| BridgeError::transport(format!("failed to write response: {}", e)))
    }

    /// Ask the backend to compare the installed gem with the latest release.
    ///
    /// With `verbose` the backend also reports when it is up to date.
    pub async fn check_gem_version(&self, verbose: bool) -> BridgeResult<()> {
        self.notify(protocol::CHECK_GEM_VERSION, json!({ "verbose": verbose }))
            .await
    }

    /// Build (or with `rebuild`, rebuild) documentation for installed gems.
    pub async fn document_gems(&self, rebuild: bool) -> BridgeResult<Value> {
        self.request(protocol::DOCUMENT_GEMS, json!({ "rebuild": rebuild }))
            .await
    }

    /// Ask the backend to download the core library documentation stub.
    pub async fn download_core(&self) -> BridgeResult<()> {
        self.notify(protocol::DOWNLOAD_CORE, json!({})).await
    }

    /// Gracefully end the connection and stop the backend.
    ///
    /// Pending requests resolve as superseded. Safe to call more than once
    /// and on a bridge that never became ready.
    pub async fn shutdown(&self) {
        let was = self.state();
        self.set_state(BridgeState::Disconnected);
        self.router.fail_all(&ResponseError::superseded());

        if was.accepts_requests() && !self.reader_handle.is_finished() {
            let id = self.next_id();
            let request = protocol::build_shutdown_request(id);
            match tokio::time::timeout(
                SHUTDOWN_TIMEOUT,
                self.send_and_wait(id, "shutdown", &request),
            )
            .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!(
                    target: "solargraph_bridge::bridge",
                    "Shutdown request failed: {}",
                    e
                ),
                Err(_) => {
                    self.router.remove(id);
                    warn!(
                        target: "solargraph_bridge::bridge",
                        "Backend did not answer shutdown within {:?}",
                        SHUTDOWN_TIMEOUT
                    );
                }
            }
            self.reader_handle.cancel();
            if let Err(e) = self.write(&protocol::build_exit_notification()).await {
                debug!(
                    target: "solargraph_bridge::bridge",
                    "Failed to send exit: {}",
                    e
                );
            }
        }

        self.close().await;
    }

    /// Close the streams and stop the supervised process without a handshake.
    async fn close(&self) {
        self.set_state(BridgeState::Disconnected);
        self.reader_handle.cancel();
        self.router.fail_all(&ResponseError::superseded());

        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!(
                target: "solargraph_bridge::bridge",
                "Writer shutdown failed: {}",
                e
            );
        }

        if let Some(supervisor) = self.supervisor.lock().await.as_mut() {
            supervisor.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::test_helpers::{FakeBackend, Reply, test_config};

    #[tokio::test]
    async fn start_reaches_ready_and_records_version() {
        let (transport, backend) = FakeBackend::spawn(|_, _| None);

        let (bridge, _events) = ProtocolBridge::start(test_config(), transport).await.unwrap();

        assert_eq!(bridge.state(), BridgeState::Ready);
        assert_eq!(bridge.server_version(), Some("0.50.0"));
        let initialize = backend.received("initialize").await;
        assert_eq!(initialize[0]["params"]["initializationOptions"]["enablePages"], true);
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn poisoned_state_lock_is_recovered() {
        let (transport, _backend) = FakeBackend::spawn(|_, _| None);
        let (bridge, _events) = ProtocolBridge::start(test_config(), transport).await.unwrap();

        let state = Arc::clone(&bridge.state);
        let _ = std::thread::spawn(move || {
            let _guard = state.write().unwrap();
            panic!("poison the bridge state");
        })
        .join();
        assert!(bridge.state.is_poisoned());

        assert_eq!(bridge.state(), BridgeState::Ready);
        assert!(bridge.transition(BridgeState::Ready, BridgeState::Degraded));
        assert_eq!(bridge.state(), BridgeState::Degraded);
    }

    #[tokio::test]
    async fn old_backend_degrades_bridge() {
        let (transport, _backend) = FakeBackend::with_version("0.30.0").spawn_with(|_, _| None);

        let (bridge, _events) = ProtocolBridge::start(test_config(), transport).await.unwrap();

        assert_eq!(bridge.state(), BridgeState::Degraded);
        assert!(bridge.state().accepts_requests());
    }

    #[tokio::test]
    async fn failed_initialize_is_a_transport_error() {
        let (transport, _backend) = FakeBackend::failing_initialize().spawn_with(|_, _| None);

        let err = ProtocolBridge::start(test_config(), transport).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport { .. }));
    }

    #[tokio::test]
    async fn silent_backend_times_out() {
        let (client, _server) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(client);
        let transport = TransportHandle::from_streams(reader, writer);

        let err = ProtocolBridge::start_with_timeout(test_config(), transport, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Transport { .. }));
    }

    #[tokio::test]
    async fn failed_request_does_not_tear_down_bridge() {
        let (transport, _backend) = FakeBackend::spawn(|method, _| match method {
            "boom" => Some(Reply::Error("backend exploded".to_string())),
            "fine" => Some(Reply::Result(json!({ "ok": true }))),
            _ => None,
        });
        let (bridge, _events) = ProtocolBridge::start(test_config(), transport).await.unwrap();

        let err = bridge.request("boom", json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::RequestFailed { .. }));
        assert_eq!(bridge.state(), BridgeState::Ready);

        let ok = bridge.request("fine", json!({})).await.unwrap();
        assert_eq!(ok["ok"], true);
    }

    #[tokio::test]
    async fn requests_after_shutdown_are_not_ready() {
        let (transport, _backend) = FakeBackend::spawn(|_, _| None);
        let (bridge, _events) = ProtocolBridge::start(test_config(), transport).await.unwrap();

        bridge.shutdown().await;

        assert_eq!(bridge.state(), BridgeState::Disconnected);
        let err = bridge.request("suggest", json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotReady));
    }

    #[tokio::test]
    async fn shutdown_supersedes_pending_requests() {
        let (transport, _backend) = FakeBackend::spawn(|method, _| match method {
            "slow" => Some(Reply::Silent),
            _ => None,
        });
        let (bridge, _events) = ProtocolBridge::start(test_config(), transport).await.unwrap();
        let bridge = Arc::new(bridge);

        let pending = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.request("slow", json!({})).await })
        };
        while bridge.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        bridge.shutdown().await;

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn backend_disconnect_is_reported() {
        let (transport, backend) = FakeBackend::spawn(|_, _| None);
        let (bridge, mut events) = ProtocolBridge::start(test_config(), transport).await.unwrap();

        backend.hang_up().await;

        loop {
            match events.recv().await {
                Some(BridgeEvent::Disconnected { .. }) => break,
                Some(_) => continue,
                None => panic!("event stream ended without disconnect"),
            }
        }
        assert_eq!(bridge.state(), BridgeState::Disconnected);
    }

    #[tokio::test]
    async fn check_gem_version_sends_notification() {
        let (transport, backend) = FakeBackend::spawn(|_, _| None);
        let (bridge, _events) = ProtocolBridge::start(test_config(), transport).await.unwrap();

        bridge.check_gem_version(true).await.unwrap();

        let sent = backend.received("$/solargraph/checkGemVersion").await;
        assert_eq!(sent[0]["params"]["verbose"], true);
        assert!(sent[0].get("id").is_none());
    }
}
