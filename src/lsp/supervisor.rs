//! Lifecycle of a spawned backend process.
//!
//! State transitions:
//! - NotStarted -> Starting (on `start`)
//! - Starting -> Running (ready signal observed)
//! - Starting -> Stopped (spawn failure or exit before ready)
//! - Running -> Stopped (on `stop`)
//! - Stopped -> Starting (on `start` again)

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;

use super::transport::diagnostics::{DiagnosticScanner, classify_exit};
use super::transport::launch::spawn_backend;
use crate::config::Configuration;
use crate::error::{BridgeError, BridgeResult};

/// How long a socket-mode backend may take to announce its port.
const SOCKET_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// A stdio-mode backend that stays quiet this long is assumed alive.
const STDIO_READY_GRACE: Duration = Duration::from_secs(1);

/// Time allowed for the child to exit after being killed.
const KILL_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Starting,
    Running,
    Stopped,
}

/// Subcommand family the backend is launched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// `stdio`: protocol over the child's pipes
    Stdio,
    /// `socket --port 0`: protocol over a loopback TCP port the child reports
    Socket,
}

impl LaunchMode {
    fn args(self) -> &'static [&'static str] {
        match self {
            LaunchMode::Stdio => &["stdio"],
            LaunchMode::Socket => &["socket", "--port", "0"],
        }
    }
}

/// Identifying metadata observed when the backend became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadySignal {
    pub port: Option<u16>,
    pub pid: Option<u32>,
}

pub struct ProcessSupervisor {
    config: Arc<Configuration>,
    mode: LaunchMode,
    state: SupervisorState,
    child: Option<Child>,
    stdio: Option<(ChildStdout, ChildStdin)>,
    ready: ReadySignal,
    stderr_task: Option<JoinHandle<()>>,
    ready_timeout: Duration,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("ready", &self.ready)
            .finish()
    }
}

impl ProcessSupervisor {
    pub fn new(config: Arc<Configuration>, mode: LaunchMode) -> Self {
        let ready_timeout = match mode {
            LaunchMode::Stdio => STDIO_READY_GRACE,
            LaunchMode::Socket => SOCKET_READY_TIMEOUT,
        };
        Self {
            config,
            mode,
            state: SupervisorState::NotStarted,
            child: None,
            stdio: None,
            ready: ReadySignal::default(),
            stderr_task: None,
            ready_timeout,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    pub fn port(&self) -> Option<u16> {
        self.ready.port
    }

    /// Backend pid as reported on its diagnostic stream.
    pub fn pid(&self) -> Option<u32> {
        self.ready.pid
    }

    /// Pid of the immediate child (may be a wrapper such as `bundle`).
    pub fn child_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Hand the child's stdout/stdin to a stdio transport. Only once.
    pub fn take_stdio(&mut self) -> Option<(ChildStdout, ChildStdin)> {
        self.stdio.take()
    }

    /// Start the backend and wait for its ready signal.
    ///
    /// Calling this while already starting or running logs a warning and
    /// returns the current metadata without spawning anything.
    pub async fn start(&mut self) -> BridgeResult<ReadySignal> {
        if matches!(
            self.state,
            SupervisorState::Starting | SupervisorState::Running
        ) {
            warn!(
                target: "solargraph_bridge::supervisor",
                "Backend process is already running; ignoring start"
            );
            return Ok(self.ready);
        }

        self.state = SupervisorState::Starting;
        self.ready = ReadySignal::default();

        let mut child = match spawn_backend(&self.config, self.mode.args()) {
            Ok(child) => child,
            Err(err) => {
                self.state = SupervisorState::Stopped;
                return Err(err);
            }
        };

        let Some(mut stderr) = child.stderr.take() else {
            self.state = SupervisorState::Stopped;
            return Err(BridgeError::transport("backend stderr is not available"));
        };

        match self.await_ready(&mut child, &mut stderr).await {
            Ok(ready) => {
                if self.mode == LaunchMode::Stdio {
                    match (child.stdout.take(), child.stdin.take()) {
                        (Some(stdout), Some(stdin)) => self.stdio = Some((stdout, stdin)),
                        _ => {
                            let _ = child.start_kill();
                            self.state = SupervisorState::Stopped;
                            return Err(BridgeError::transport("backend stdio is not available"));
                        }
                    }
                }
                info!(
                    target: "solargraph_bridge::supervisor",
                    "Backend ready (port={:?}, pid={:?})",
                    ready.port,
                    ready.pid
                );
                self.stderr_task = Some(tokio::spawn(forward_diagnostics(stderr)));
                self.child = Some(child);
                self.ready = ready;
                self.state = SupervisorState::Running;
                Ok(ready)
            }
            Err(err) => {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(KILL_WAIT, child.wait()).await;
                self.state = SupervisorState::Stopped;
                Err(err)
            }
        }
    }

    async fn await_ready(
        &self,
        child: &mut Child,
        stderr: &mut ChildStderr,
    ) -> BridgeResult<ReadySignal> {
        let command = self.config.command.entry_point().to_string();
        let mut scanner = DiagnosticScanner::new();
        let mut buf = vec![0u8; 4096];
        let deadline = tokio::time::sleep(self.ready_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                read = stderr.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        let status = child.wait().await?;
                        return Err(classify_exit(&command, scanner.transcript(), status.code()));
                    }
                    let chunk = String::from_utf8_lossy(&buf[..n]);
                    debug!(target: "solargraph_bridge::supervisor", "{}", chunk.trim_end());

                    let found = scanner.feed(&chunk);
                    if let Some(err) = scanner.failure(&command) {
                        return Err(err);
                    }
                    match (self.mode, found) {
                        (LaunchMode::Stdio, _) => return Ok(ReadySignal::default()),
                        (LaunchMode::Socket, Some((port, pid))) => {
                            return Ok(ReadySignal { port: Some(port), pid: Some(pid) });
                        }
                        (LaunchMode::Socket, None) => {}
                    }
                }
                status = child.wait() => {
                    let status = status?;
                    // Output written just before exiting may still be buffered.
                    let mut rest = String::new();
                    let _ = tokio::time::timeout(
                        Duration::from_millis(200),
                        stderr.read_to_string(&mut rest),
                    )
                    .await;
                    scanner.feed(&rest);
                    return Err(classify_exit(&command, scanner.transcript(), status.code()));
                }
                _ = &mut deadline => {
                    return match self.mode {
                        LaunchMode::Stdio => Ok(ReadySignal::default()),
                        LaunchMode::Socket => Err(BridgeError::transport(format!(
                            "backend did not report a port within {:?}",
                            self.ready_timeout
                        ))),
                    };
                }
            }
        }
    }

    /// Terminate the child and, if reported separately, the backend pid.
    pub async fn stop(&mut self) {
        if !matches!(
            self.state,
            SupervisorState::Starting | SupervisorState::Running
        ) {
            warn!(
                target: "solargraph_bridge::supervisor",
                "Backend process is not running; ignoring stop"
            );
            return;
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.stdio = None;

        let child_id = self.child_id();
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            if tokio::time::timeout(KILL_WAIT, child.wait()).await.is_err() {
                warn!(
                    target: "solargraph_bridge::supervisor",
                    "Backend process did not exit within {:?}",
                    KILL_WAIT
                );
            }
        }
        if let Some(pid) = self.ready.pid
            && Some(pid) != child_id
        {
            terminate_pid(pid);
        }

        self.ready = ReadySignal::default();
        self.state = SupervisorState::Stopped;
        info!(target: "solargraph_bridge::supervisor", "Backend process stopped");
    }

    /// `stop` (when running) followed by `start`.
    pub async fn restart(&mut self) -> BridgeResult<ReadySignal> {
        if self.state == SupervisorState::Running {
            self.stop().await;
        }
        self.start().await
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        // The child itself is kill_on_drop; a separately reported backend is not.
        if self.state == SupervisorState::Running
            && let Some(pid) = self.ready.pid
            && Some(pid) != self.child_id()
        {
            terminate_pid(pid);
        }
    }
}

/// Log the backend's diagnostic output until it closes.
async fn forward_diagnostics(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "solargraph_bridge::supervisor", "{}", line);
    }
}

#[cfg(unix)]
fn terminate_pid(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if pid <= 1 || pid == std::process::id() {
        return;
    }
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => debug!(
            target: "solargraph_bridge::supervisor",
            "Sent SIGTERM to backend pid {}",
            pid
        ),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(
            target: "solargraph_bridge::supervisor",
            "Failed to signal backend pid {}: {}",
            pid,
            e
        ),
    }
}

#[cfg(windows)]
fn terminate_pid(pid: u32) {
    if pid == std::process::id() {
        return;
    }
    let result = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    if let Err(e) = result {
        warn!(
            target: "solargraph_bridge::supervisor",
            "Failed to terminate backend pid {}: {}",
            pid,
            e
        );
    }
}
