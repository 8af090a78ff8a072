//! Shared fixtures for bridge, cache and lifecycle tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{BufReader, DuplexStream, WriteHalf};
use tokio::task::JoinHandle;

use crate::config::{Configuration, Settings};
use crate::error::{BridgeError, BridgeResult};
use crate::host::{EditorHost, MessageKind};
use crate::lsp::bridge::connection::{read_message, write_message};
use crate::lsp::lifecycle::Connector;
use crate::lsp::transport::TransportHandle;

/// Configuration rooted at `/work/app` with default settings.
pub(crate) fn test_config() -> Arc<Configuration> {
    Arc::new(Configuration::resolve(
        Settings::default(),
        vec![PathBuf::from("/work/app")],
    ))
}

/// Write an executable `#!/bin/sh` script standing in for the backend.
#[cfg(unix)]
pub(crate) fn fake_backend_script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("solargraph");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// What the fake backend does with a request.
pub(crate) enum Reply {
    Result(Value),
    Error(String),
    /// Never answer
    Silent,
}

type Handler = dyn Fn(&str, &Value) -> Option<Reply> + Send + Sync;

/// In-process backend speaking framed JSON-RPC over a duplex pipe.
///
/// `initialize` and `shutdown` are answered automatically; everything else
/// goes to the handler, and a `None` from the handler answers `null`.
pub(crate) struct FakeBackend {
    version: String,
    fail_initialize: bool,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            version: "0.50.0".to_string(),
            fail_initialize: false,
        }
    }
}

impl FakeBackend {
    pub(crate) fn spawn<F>(handler: F) -> (TransportHandle, FakeBackendHandle)
    where
        F: Fn(&str, &Value) -> Option<Reply> + Send + Sync + 'static,
    {
        Self::default().spawn_with(handler)
    }

    pub(crate) fn with_version(version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn failing_initialize() -> Self {
        Self {
            fail_initialize: true,
            ..Self::default()
        }
    }

    pub(crate) fn spawn_with<F>(self, handler: F) -> (TransportHandle, FakeBackendHandle)
    where
        F: Fn(&str, &Value) -> Option<Reply> + Send + Sync + 'static,
    {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let received = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::new(tokio::sync::Mutex::new(Some(server_write)));
        let task = tokio::spawn(serve(
            BufReader::new(server_read),
            Arc::clone(&writer),
            self,
            Arc::new(handler),
            Arc::clone(&received),
        ));

        (
            TransportHandle::from_streams(client_read, client_write),
            FakeBackendHandle {
                received,
                writer,
                task: Mutex::new(Some(task)),
            },
        )
    }
}

async fn serve(
    mut reader: BufReader<tokio::io::ReadHalf<DuplexStream>>,
    writer: Arc<tokio::sync::Mutex<Option<WriteHalf<DuplexStream>>>>,
    backend: FakeBackend,
    handler: Arc<Handler>,
    received: Arc<Mutex<Vec<Value>>>,
) {
    while let Ok(message) = read_message(&mut reader).await {
        received.lock().unwrap().push(message.clone());

        let (Some(id), Some(method)) = (
            message.get("id").cloned(),
            message.get("method").and_then(Value::as_str),
        ) else {
            continue;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let reply = match method {
            "initialize" if backend.fail_initialize => Reply::Error("initialize refused".to_string()),
            "initialize" => Reply::Result(json!({
                "capabilities": {},
                "serverInfo": { "name": "solargraph", "version": backend.version }
            })),
            "shutdown" => Reply::Result(Value::Null),
            _ => handler(method, &params).unwrap_or(Reply::Result(Value::Null)),
        };
        let response = match reply {
            Reply::Result(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Reply::Error(message) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32603, "message": message }
            }),
            Reply::Silent => continue,
        };

        let mut guard = writer.lock().await;
        let Some(out) = guard.as_mut() else { break };
        if write_message(out, &response).await.is_err() {
            break;
        }
    }
}

/// Test-side controls of a running [`FakeBackend`].
pub(crate) struct FakeBackendHandle {
    received: Arc<Mutex<Vec<Value>>>,
    writer: Arc<tokio::sync::Mutex<Option<WriteHalf<DuplexStream>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FakeBackendHandle {
    /// Messages received so far for `method`.
    pub(crate) fn count(&self, method: &str) -> usize {
        self.matching(method).len()
    }

    fn matching(&self, method: &str) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.get("method").and_then(Value::as_str) == Some(method))
            .cloned()
            .collect()
    }

    /// Wait (up to two seconds) until at least one `method` message arrived.
    pub(crate) async fn received(&self, method: &str) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let found = self.matching(method);
            if !found.is_empty() || tokio::time::Instant::now() >= deadline {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait (up to two seconds) until `count` `method` messages arrived.
    pub(crate) async fn received_times(&self, method: &str, count: usize) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let found = self.matching(method);
            if found.len() >= count || tokio::time::Instant::now() >= deadline {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait (up to two seconds) for the client's response to request `id`.
    pub(crate) async fn response(&self, id: i64) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let found = self
                .received
                .lock()
                .unwrap()
                .iter()
                .find(|m| m.get("method").is_none() && m.get("id").and_then(Value::as_i64) == Some(id))
                .cloned();
            if found.is_some() || tokio::time::Instant::now() >= deadline {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Push a notification or server-initiated request to the client.
    pub(crate) async fn send(&self, message: Value) {
        if let Some(out) = self.writer.lock().await.as_mut() {
            write_message(out, &message).await.unwrap();
        }
    }

    /// Close the pipe as a crashed backend would.
    pub(crate) async fn hang_up(&self) {
        self.writer.lock().await.take();
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }
}

/// [`EditorHost`] that records everything and answers from scripted queues.
#[derive(Default)]
pub(crate) struct RecordingHost {
    statuses: Mutex<Vec<String>>,
    messages: Mutex<Vec<(MessageKind, String, Vec<String>)>>,
    message_answers: Mutex<VecDeque<Option<String>>>,
    input_answers: Mutex<VecDeque<Option<String>>>,
    retry_answers: Mutex<VecDeque<bool>>,
    retry_prompts: Mutex<Vec<String>>,
    opened: Mutex<Vec<(String, String)>>,
    /// When set, message answers wait for [`RecordingHost::release_answers`].
    answer_gate: Option<Arc<tokio::sync::Semaphore>>,
}

impl RecordingHost {
    pub(crate) fn holding_answers(mut self) -> Self {
        self.answer_gate = Some(Arc::new(tokio::sync::Semaphore::new(0)));
        self
    }

    /// Let `count` held message answers through.
    pub(crate) fn release_answers(&self, count: usize) {
        if let Some(gate) = &self.answer_gate {
            gate.add_permits(count);
        }
    }

    pub(crate) fn with_retry_answers(self, answers: Vec<bool>) -> Self {
        *self.retry_answers.lock().unwrap() = answers.into();
        self
    }

    pub(crate) fn with_message_answers(self, answers: Vec<Option<String>>) -> Self {
        *self.message_answers.lock().unwrap() = answers.into();
        self
    }

    pub(crate) fn with_input_answers(self, answers: Vec<Option<String>>) -> Self {
        *self.input_answers.lock().unwrap() = answers.into();
        self
    }

    pub(crate) fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub(crate) fn messages(&self) -> Vec<(MessageKind, String, Vec<String>)> {
        self.messages.lock().unwrap().clone()
    }

    pub(crate) fn retry_prompts(&self) -> Vec<String> {
        self.retry_prompts.lock().unwrap().clone()
    }

    pub(crate) fn opened(&self) -> Vec<(String, String)> {
        self.opened.lock().unwrap().clone()
    }
}

impl EditorHost for RecordingHost {
    fn set_status(&self, text: &str) {
        self.statuses.lock().unwrap().push(text.to_string());
    }

    fn show_message(
        &self,
        kind: MessageKind,
        message: &str,
        actions: &[String],
    ) -> impl Future<Output = Option<String>> + Send {
        self.messages
            .lock()
            .unwrap()
            .push((kind, message.to_string(), actions.to_vec()));
        let answer = self.message_answers.lock().unwrap().pop_front().flatten();
        let gate = self.answer_gate.clone();
        async move {
            if let Some(gate) = gate
                && let Ok(permit) = gate.acquire().await
            {
                permit.forget();
            }
            answer
        }
    }

    fn prompt_input(&self, _prompt: &str) -> impl Future<Output = Option<String>> + Send {
        let answer = self.input_answers.lock().unwrap().pop_front().flatten();
        std::future::ready(answer)
    }

    fn confirm_retry(&self, message: &str) -> impl Future<Output = bool> + Send {
        self.retry_prompts.lock().unwrap().push(message.to_string());
        let answer = self.retry_answers.lock().unwrap().pop_front().unwrap_or(false);
        std::future::ready(answer)
    }

    fn open_document(&self, uri: &str, title: &str) {
        self.opened
            .lock()
            .unwrap()
            .push((uri.to_string(), title.to_string()));
    }
}

/// [`Connector`] handing out prepared transports in order.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    transports: Mutex<VecDeque<BridgeResult<TransportHandle>>>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub(crate) fn new(transports: Vec<BridgeResult<TransportHandle>>) -> Arc<Self> {
        Arc::new(Self {
            transports: Mutex::new(transports.into()),
            connects: AtomicUsize::new(0),
        })
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for Arc<ScriptedConnector> {
    fn connect<H: EditorHost>(
        &self,
        _config: Arc<Configuration>,
        _host: &H,
    ) -> impl Future<Output = BridgeResult<TransportHandle>> + Send {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self
            .transports
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BridgeError::transport("no transport left")));
        std::future::ready(next)
    }
}
