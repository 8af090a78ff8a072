//! Transport selection: turning a configuration into a connected byte stream.
//!
//! - `stdio`: spawn `solargraph stdio` and use the child's pipes
//! - `socket`: spawn `solargraph socket --port 0`, wait for `port=`/`pid=`,
//!   then connect over loopback TCP
//! - `external`: connect to a configured host and port, asking the user
//!   whether to retry when the connection fails

pub mod diagnostics;
pub mod launch;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::supervisor::{LaunchMode, ProcessSupervisor};
use crate::config::{Configuration, TransportKind};
use crate::error::{BridgeError, BridgeResult};
use crate::host::EditorHost;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Time allowed for a single TCP connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts made against an external backend before giving up.
pub const EXTERNAL_CONNECT_ATTEMPTS: usize = 3;

/// Loopback host a spawned socket backend listens on.
const LOCAL_HOST: &str = "localhost";

/// One established connection to the backend.
///
/// Replaced wholesale on restart; the port and pid never change for the
/// life of a handle.
pub struct TransportHandle {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub supervisor: Option<ProcessSupervisor>,
    pub port: Option<u16>,
    pub pid: Option<u32>,
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("supervisor", &self.supervisor)
            .field("port", &self.port)
            .field("pid", &self.pid)
            .finish()
    }
}

impl TransportHandle {
    /// A handle over arbitrary streams with no process behind it.
    pub fn from_streams(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            supervisor: None,
            port: None,
            pid: None,
        }
    }
}

pub struct TransportSelector;

impl TransportSelector {
    /// Establish a connection as the configured transport kind dictates.
    pub async fn connect<H: EditorHost>(
        config: Arc<Configuration>,
        host: &H,
    ) -> BridgeResult<TransportHandle> {
        log::info!(
            target: "solargraph_bridge::transport",
            "Connecting with {} transport",
            config.transport.as_str()
        );
        match config.transport {
            TransportKind::Stdio => Self::connect_stdio(config).await,
            TransportKind::Socket => Self::connect_socket(config).await,
            TransportKind::External => Self::connect_external(&config, host).await,
        }
    }

    async fn connect_stdio(config: Arc<Configuration>) -> BridgeResult<TransportHandle> {
        let mut supervisor = ProcessSupervisor::new(config, LaunchMode::Stdio);
        let ready = supervisor.start().await?;
        let Some((stdout, stdin)) = supervisor.take_stdio() else {
            supervisor.stop().await;
            return Err(BridgeError::transport("backend stdio is not available"));
        };

        Ok(TransportHandle {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            pid: ready.pid.or_else(|| supervisor.child_id()),
            port: None,
            supervisor: Some(supervisor),
        })
    }

    async fn connect_socket(config: Arc<Configuration>) -> BridgeResult<TransportHandle> {
        let mut supervisor = ProcessSupervisor::new(config, LaunchMode::Socket);
        let ready = supervisor.start().await?;
        let Some(port) = ready.port else {
            supervisor.stop().await;
            return Err(BridgeError::transport("backend did not report a port"));
        };

        let stream = match connect_tcp(LOCAL_HOST, port).await {
            Ok(stream) => stream,
            Err(err) => {
                supervisor.stop().await;
                return Err(err);
            }
        };
        let (reader, writer) = stream.into_split();

        Ok(TransportHandle {
            reader: Box::new(reader),
            writer: Box::new(writer),
            supervisor: Some(supervisor),
            port: Some(port),
            pid: ready.pid,
        })
    }

    async fn connect_external<H: EditorHost>(
        config: &Configuration,
        host: &H,
    ) -> BridgeResult<TransportHandle> {
        let endpoint = &config.external;
        let mut attempt = 1;
        loop {
            match connect_tcp(&endpoint.host, endpoint.port).await {
                Ok(stream) => {
                    let (reader, writer) = stream.into_split();
                    return Ok(TransportHandle {
                        reader: Box::new(reader),
                        writer: Box::new(writer),
                        supervisor: None,
                        port: Some(endpoint.port),
                        pid: None,
                    });
                }
                Err(err) if attempt >= EXTERNAL_CONNECT_ATTEMPTS => return Err(err),
                Err(err) => {
                    log::warn!(
                        target: "solargraph_bridge::transport",
                        "External backend attempt {}/{} failed: {}",
                        attempt,
                        EXTERNAL_CONNECT_ATTEMPTS,
                        err
                    );
                    let message = format!(
                        "Could not connect to the Solargraph server at {}:{}. Retry?",
                        endpoint.host, endpoint.port
                    );
                    if !host.confirm_retry(&message).await {
                        return Err(BridgeError::cancelled(
                            "connection to external backend abandoned",
                        ));
                    }
                    attempt += 1;
                }
            }
        }
    }
}

async fn connect_tcp(host: &str, port: u16) -> BridgeResult<TcpStream> {
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(e)) => Err(BridgeError::transport(format!(
            "connection to {}:{} failed: {}",
            host, port, e
        ))),
        Err(_) => Err(BridgeError::transport(format!(
            "connection to {}:{} timed out after {:?}",
            host, port, CONNECT_TIMEOUT
        ))),
    }
}
