//! Connection to a single provider process
//!
//! A [`ProtocolConnection`] owns the child process, writes requests to its
//! stdin, and runs a reader task that decodes stdout line by line. Calls are
//! serialized: the input stream is locked for the whole request/response
//! exchange, so at most one call is in flight and responses arrive in the
//! order requests were issued.
//!
//! The pending-call slot holds a single entry. Replacing it with a map keyed
//! by request id is all that pipelining would need on the read side.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::protocol::{
    methods, Incoming, InitializeParams, Notification, Request, Response, ToolCallParams,
    PROTOCOL_VERSION,
};
use crate::config::ProviderConfig;
use crate::error::{ProtocolError, ProtocolResult};

/// Warm-up between spawn and handshake for slow-starting providers.
///
/// Overridden by `globalSettings.startupDelayMs`.
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(2);

/// How many times the handshake waits for the `initialize` response
pub const HANDSHAKE_ATTEMPTS: u32 = 5;

/// Wait per handshake attempt
pub const HANDSHAKE_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest stdout or stderr line kept; longer lines are skipped whole
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// An in-flight request waiting for its response
struct PendingCall {
    id: u64,
    slot: oneshot::Sender<Response>,
}

/// Never held across an await
type PendingSlot = Arc<std::sync::Mutex<Option<PendingCall>>>;

fn lock_pending(pending: &PendingSlot) -> MutexGuard<'_, Option<PendingCall>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clear the pending registration for `id` unless it was already resolved
fn clear_pending(pending: &PendingSlot, id: u64) {
    let mut slot = lock_pending(pending);
    if slot.as_ref().is_some_and(|call| call.id == id) {
        slot.take();
    }
}

/// Clears a call's registration when its future completes or is dropped
struct PendingGuard<'a> {
    pending: &'a PendingSlot,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        clear_pending(self.pending, self.id);
    }
}

/// A running provider and the protocol state spoken with it
pub struct ProtocolConnection {
    name: String,
    config: ProviderConfig,
    timeout: Duration,
    handshake_attempt_timeout: Duration,
    pid: Option<u32>,
    started_at: Instant,
    child: Mutex<Option<Child>>,
    /// Input stream; holding this lock is what serializes calls
    writer: Mutex<Option<Writer>>,
    pending: PendingSlot,
    next_id: AtomicU64,
    /// Set by a successful handshake, cleared by `close`
    active: AtomicBool,
    /// Cleared by the reader task when stdout ends
    stream_open: Arc<AtomicBool>,
    /// Set once by `close`
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProtocolConnection {
    /// Spawn the provider, wait out the warm-up delay, and perform the handshake.
    ///
    /// The child is created with `kill_on_drop`, so it does not outlive a
    /// failed or cancelled open.
    pub async fn open(
        name: &str,
        config: ProviderConfig,
        startup_delay: Duration,
    ) -> ProtocolResult<Self> {
        if !config.enabled {
            return Err(ProtocolError::ProviderDisabled(name.to_string()));
        }

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(config.expanded_env())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let spawn_failed = |source: std::io::Error| ProtocolError::ProcessSpawnFailed {
            command: config.command.clone(),
            source,
        };

        let mut child = cmd.spawn().map_err(spawn_failed)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_failed(std::io::Error::other("stdin was not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_failed(std::io::Error::other("stdout was not captured")))?;
        let stderr = child.stderr.take();

        tracing::info!(
            "Spawned provider '{}' (pid {:?}): {} {}",
            name,
            child.id(),
            config.command,
            config.args.join(" ")
        );

        if !startup_delay.is_zero() {
            tokio::time::sleep(startup_delay).await;
        }

        let mut connection = Self::from_streams(name, config, stdin, stdout, Some(child));
        if let Some(stderr) = stderr {
            connection
                .tasks
                .get_mut()
                .push(spawn_stderr_drain(name.to_string(), stderr));
        }

        if let Err(e) = connection.handshake().await {
            if let Err(close_err) = connection.close().await {
                tracing::warn!("Cleanup after failed handshake with '{}': {}", name, close_err);
            }
            return Err(e);
        }

        Ok(connection)
    }

    /// Build a connection over arbitrary streams and start its reader task.
    ///
    /// The connection is not active until [`handshake`](Self::handshake)
    /// succeeds.
    pub fn from_streams<W, R>(
        name: &str,
        config: ProviderConfig,
        writer: W,
        reader: R,
        child: Option<Child>,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending: PendingSlot = Arc::new(std::sync::Mutex::new(None));
        let stream_open = Arc::new(AtomicBool::new(true));
        let reader_task = spawn_reader(
            name.to_string(),
            reader,
            Arc::clone(&pending),
            Arc::clone(&stream_open),
        );

        Self {
            name: name.to_string(),
            timeout: config.call_timeout(),
            config,
            handshake_attempt_timeout: HANDSHAKE_ATTEMPT_TIMEOUT,
            pid: child.as_ref().and_then(Child::id),
            started_at: Instant::now(),
            child: Mutex::new(child),
            writer: Mutex::new(Some(Box::new(writer))),
            pending,
            next_id: AtomicU64::new(1),
            active: AtomicBool::new(false),
            stream_open,
            closed: AtomicBool::new(false),
            tasks: Mutex::new(vec![reader_task]),
        }
    }

    /// Override the per-attempt handshake wait
    pub fn with_handshake_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_attempt_timeout = timeout;
        self
    }

    /// OS process id, if the connection owns a child
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Handshake completed, not closed, and the output stream is still open
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.stream_open.load(Ordering::Acquire)
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Perform the `initialize` / `notifications/initialized` exchange
    pub async fn handshake(&self) -> ProtocolResult<()> {
        let failed = |reason: String| ProtocolError::HandshakeFailed {
            provider: self.name.clone(),
            reason,
        };

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| failed("input stream is closed".to_string()))?;

        let id = self.next_request_id();
        let params = serde_json::to_value(InitializeParams::for_client())?;
        let mut rx = self
            .send_request(writer, id, methods::INITIALIZE, params)
            .await
            .map_err(|e| failed(format!("failed to send initialize: {}", e)))?;
        let _registration = PendingGuard {
            pending: &self.pending,
            id,
        };

        let mut response = None;
        for attempt in 1..=HANDSHAKE_ATTEMPTS {
            match tokio::time::timeout(self.handshake_attempt_timeout, &mut rx).await {
                Ok(Ok(resp)) => {
                    response = Some(resp);
                    break;
                }
                Ok(Err(_)) => {
                    return Err(failed("provider closed its output stream".to_string()));
                }
                Err(_) => {
                    tracing::debug!(
                        "Provider '{}': no initialize response yet (attempt {}/{})",
                        self.name,
                        attempt,
                        HANDSHAKE_ATTEMPTS
                    );
                }
            }
        }

        let Some(response) = response else {
            return Err(failed(format!(
                "no initialize response after {} attempts",
                HANDSHAKE_ATTEMPTS
            )));
        };

        if let Some(err) = response.error {
            return Err(failed(format!(
                "initialize rejected: {} (code {})",
                err.message, err.code
            )));
        }

        let version = response
            .result
            .as_ref()
            .and_then(|r| r.get("protocolVersion"))
            .and_then(Value::as_str);
        if let Some(version) = version {
            if version != PROTOCOL_VERSION {
                tracing::warn!(
                    "Provider '{}' speaks protocol '{}' (we announced '{}')",
                    self.name,
                    version,
                    PROTOCOL_VERSION
                );
            }
        }

        write_line(writer, &Notification::new(methods::INITIALIZED, None))
            .await
            .map_err(|e| failed(format!("failed to send initialized notification: {}", e)))?;

        if self.closed.load(Ordering::Acquire) {
            return Err(failed("connection was closed".to_string()));
        }
        self.active.store(true, Ordering::Release);
        tracing::info!("Provider '{}' initialized", self.name);
        Ok(())
    }

    /// Invoke a tool and wait for its result.
    ///
    /// Blocks while another call on this connection is in flight. A timeout
    /// leaves the process running.
    pub async fn call(&self, tool: &str, arguments: Value) -> ProtocolResult<Value> {
        if !self.is_active() {
            return Err(ProtocolError::NotActive(self.name.clone()));
        }

        let params = serde_json::to_value(ToolCallParams {
            name: tool.to_string(),
            arguments,
        })?;

        let mut guard = self.writer.lock().await;
        // Closed or lost while we waited for the previous call
        if !self.is_active() {
            return Err(ProtocolError::NotActive(self.name.clone()));
        }
        let writer = guard
            .as_mut()
            .ok_or_else(|| ProtocolError::NotActive(self.name.clone()))?;

        let id = self.next_request_id();
        let deadline = tokio::time::Instant::now() + self.timeout;
        tracing::debug!("Provider '{}': calling '{}' (id {})", self.name, tool, id);
        let started = Instant::now();

        let rx = self
            .send_request(writer, id, methods::TOOLS_CALL, params)
            .await?;
        let _registration = PendingGuard {
            pending: &self.pending,
            id,
        };

        let response = match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                tracing::warn!(
                    "Provider '{}' closed its output while '{}' was pending",
                    self.name,
                    tool
                );
                return Err(ProtocolError::StreamClosed(self.name.clone()));
            }
            Err(_) => {
                tracing::warn!(
                    "Provider '{}': '{}' timed out after {:?}",
                    self.name,
                    tool,
                    self.timeout
                );
                return Err(ProtocolError::CallTimeout {
                    provider: self.name.clone(),
                    tool: tool.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        tracing::debug!(
            "Provider '{}': '{}' (id {}) answered in {:?}",
            self.name,
            tool,
            id,
            started.elapsed()
        );

        if let Some(err) = response.error {
            return Err(ProtocolError::ProviderError {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Register the pending call, then write the request line
    async fn send_request(
        &self,
        writer: &mut Writer,
        id: u64,
        method: &str,
        params: Value,
    ) -> ProtocolResult<oneshot::Receiver<Response>> {
        let (tx, rx) = oneshot::channel();
        *lock_pending(&self.pending) = Some(PendingCall { id, slot: tx });

        // `close` sets `closed` before taking the slot, so a registration it
        // missed is seen here
        if self.closed.load(Ordering::Acquire) {
            clear_pending(&self.pending, id);
            return Err(ProtocolError::NotActive(self.name.clone()));
        }

        let request = Request::new(id, method, Some(params));
        if let Err(e) = write_line(writer, &request).await {
            clear_pending(&self.pending, id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Close stdin, kill the process, and stop the background tasks.
    ///
    /// Idempotent. A call in flight fails with `StreamClosed` instead of
    /// waiting out its timeout. Every resource is released even when killing
    /// the process fails; that failure is returned afterwards.
    pub async fn close(&self) -> ProtocolResult<()> {
        self.closed.store(true, Ordering::Release);
        let was_active = self.active.swap(false, Ordering::AcqRel);
        let mut result = Ok(());

        // Signal end-of-input first when no call holds the stream
        if let Ok(mut guard) = self.writer.try_lock() {
            if let Some(writer) = guard.take() {
                self.shutdown_writer(writer).await;
            }
        }

        // Fail the in-flight call so it releases the stream
        lock_pending(&self.pending).take();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!("Provider '{}' already exited: {}", self.name, status);
                }
                _ => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!("Failed to kill provider '{}': {}", self.name, e);
                        result = Err(ProtocolError::Io(e));
                    }
                }
            }
        }

        if let Some(writer) = self.writer.lock().await.take() {
            self.shutdown_writer(writer).await;
        }

        if was_active {
            tracing::info!("Closed provider '{}'", self.name);
        }
        result
    }

    async fn shutdown_writer(&self, mut writer: Writer) {
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("Provider '{}': closing input stream: {}", self.name, e);
        }
    }
}

/// Outcome of [`read_line_bounded`]
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Eof,
    Line,
    /// Line longer than [`MAX_LINE_BYTES`], discarded; carries its length
    Oversized(usize),
}

/// Read one line into `buf`, never buffering more than `MAX_LINE_BYTES`
async fn read_line_bounded<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let limit = MAX_LINE_BYTES as u64;

    buf.clear();
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if n < MAX_LINE_BYTES || buf.last() == Some(&b'\n') {
        return Ok(LineRead::Line);
    }

    let mut skipped = n;
    loop {
        buf.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
        skipped += n;
        if n == 0 || buf.last() == Some(&b'\n') {
            break;
        }
    }
    buf.clear();
    Ok(LineRead::Oversized(skipped))
}

async fn write_line<T: Serialize>(writer: &mut Writer, message: &T) -> ProtocolResult<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Decode stdout; resolve the pending call when its response arrives
fn spawn_reader<R>(
    name: String,
    reader: R,
    pending: PendingSlot,
    stream_open: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            match read_line_bounded(&mut reader, &mut buf).await {
                Ok(LineRead::Eof) => {
                    tracing::info!("Provider '{}' closed its output stream", name);
                    break;
                }
                Ok(LineRead::Oversized(len)) => {
                    tracing::warn!(
                        "Provider '{}': discarding {} byte line (limit {})",
                        name,
                        len,
                        MAX_LINE_BYTES
                    );
                }
                Ok(LineRead::Line) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    match Incoming::decode(line) {
                        Ok(Incoming::Response(response)) => {
                            deliver(&name, &pending, response);
                        }
                        Ok(Incoming::OutOfBand(method)) => {
                            tracing::debug!(
                                "Provider '{}': discarding out-of-band message ({})",
                                name,
                                method.as_deref().unwrap_or("no method")
                            );
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Provider '{}': discarding undecodable line: {}: {}",
                                name,
                                e,
                                line
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Provider '{}' read error: {}", name, e);
                    break;
                }
            }
        }

        stream_open.store(false, Ordering::Release);
        // Dropping the sender fails the waiting call with StreamClosed
        lock_pending(&pending).take();
    })
}

fn deliver(name: &str, pending: &PendingSlot, response: Response) {
    let mut slot = lock_pending(pending);
    match slot.take() {
        Some(call) if call.id == response.id => {
            let _ = call.slot.send(response);
        }
        other => {
            *slot = other;
            tracing::debug!(
                "Provider '{}': dropping response {} with no matching pending call",
                name,
                response.id
            );
        }
    }
}

fn spawn_stderr_drain(name: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            match read_line_bounded(&mut reader, &mut buf).await {
                Ok(LineRead::Eof) | Err(_) => break,
                Ok(LineRead::Oversized(len)) => {
                    tracing::debug!("Provider '{}' stderr: skipped {} byte line", name, len);
                }
                Ok(LineRead::Line) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    if !line.is_empty() {
                        tracing::debug!("Provider '{}' stderr: {}", name, line);
                    }
                }
            }
        }
    })
}
