// ABOUTME: MisskeyCli owns the `what stream` child process and the one-shot command path.
// ABOUTME: Stdout lines become StreamEvents, stderr chunks and exits become lifecycle events.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command as ProcessCommand};
use tokio_util::sync::CancellationToken;

use crate::command::{self, CommandResult, DEFAULT_COMMAND_TIMEOUT};
use crate::event::BridgeEvent;
use crate::hub::{EventFilter, EventHub, EventReceiver};
use crate::reconnect::{ReconnectPolicy, ReconnectState};

/// Binary name used when nothing is configured
pub const DEFAULT_BINARY: &str = "what";

/// How long a stopped stream gets to exit after SIGTERM before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// How long stderr may stay open after the child exits
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for a CLI bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Path or name of the CLI binary
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Bound on one-shot commands
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_binary() -> String {
    DEFAULT_BINARY.to_string()
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_secs()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

/// Options for `start_stream`
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Respawn the process after it exits; None leaves it stopped
    pub reconnect: Option<ReconnectPolicy>,
}

impl StreamOptions {
    pub fn with_reconnect(policy: ReconnectPolicy) -> Self {
        Self {
            reconnect: Some(policy),
        }
    }
}

/// Bridge to the `what` CLI. Cheap to clone; clones share the process slot
/// and subscribers.
#[derive(Clone)]
pub struct MisskeyCli {
    inner: Arc<Inner>,
}

struct Inner {
    binary: String,
    command_timeout: Duration,
    hub: EventHub,
    session: Mutex<Option<StreamSession>>,
    generation: AtomicU64,
}

/// The one live stream process, held through its supervisor task
struct StreamSession {
    generation: u64,
    cancel: CancellationToken,
}

enum PumpOutcome {
    Exited(Option<i32>),
    Cancelled,
}

impl MisskeyCli {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                binary: config.binary,
                command_timeout: Duration::from_secs(config.command_timeout_secs),
                hub: EventHub::new(),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Bridge for `binary` with default settings
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self::new(BridgeConfig {
            binary: binary.into(),
            ..BridgeConfig::default()
        })
    }

    pub fn binary(&self) -> &str {
        &self.inner.binary
    }

    pub fn command_timeout(&self) -> Duration {
        self.inner.command_timeout
    }

    /// Whether the configured binary exists (for paths) or is on PATH (for names)
    pub fn is_available(&self) -> bool {
        resolve_binary(&self.inner.binary).is_some()
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventReceiver {
        self.inner.hub.subscribe(filter)
    }

    pub fn events(&self) -> &EventHub {
        &self.inner.hub
    }

    /// Whether a stream process (or its reconnect loop) is held right now
    pub fn is_running(&self) -> bool {
        self.inner.lock_session().is_some()
    }

    /// Spawn `<binary> stream` and start forwarding its output. Returns false
    /// and publishes an Error event when the binary is missing, a stream is
    /// already running, or spawning fails. Must be called inside a tokio runtime.
    pub fn start_stream(&self, options: StreamOptions) -> bool {
        let inner = &self.inner;
        if !self.is_available() {
            inner.hub.publish(BridgeEvent::Error(format!(
                "CLI binary '{}' not found in PATH",
                inner.binary
            )));
            return false;
        }

        let mut slot = inner.lock_session();
        if slot.is_some() {
            inner
                .hub
                .publish(BridgeEvent::Error("stream is already running".to_string()));
            return false;
        }

        let child = match spawn_stream(&inner.binary) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(binary = %inner.binary, error = %e, "failed to start stream");
                inner.hub.publish(BridgeEvent::Error(format!("{:#}", e)));
                return false;
            }
        };

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        *slot = Some(StreamSession {
            generation,
            cancel: cancel.clone(),
        });
        drop(slot);

        tracing::info!(binary = %inner.binary, pid = ?child.id(), "stream process started");
        tokio::spawn(supervise(
            Arc::clone(inner),
            child,
            options,
            cancel,
            generation,
        ));
        true
    }

    /// Terminate the stream process, if any, and release it. Idempotent.
    pub fn stop_stream(&self) {
        let session = self.inner.lock_session().take();
        if let Some(session) = session {
            tracing::info!(binary = %self.inner.binary, "stopping stream process");
            session.cancel.cancel();
        }
    }

    /// Run `<binary> args...` once. Never fails: problems come back as
    /// `CommandResult::Error`. Don't await this from a per-line stream handler.
    pub async fn run_command(&self, args: Vec<String>) -> CommandResult {
        if !self.is_available() {
            return CommandResult::error(format!("CLI binary '{}' not found", self.inner.binary));
        }
        command::run(&self.inner.binary, &args, self.inner.command_timeout).await
    }
}

impl Inner {
    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<StreamSession>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop the process slot if it still belongs to `generation`
    fn release(&self, generation: u64) {
        let mut slot = self.lock_session();
        if slot.as_ref().map(|s| s.generation) == Some(generation) {
            *slot = None;
        }
    }
}

/// Locate the binary: paths are checked directly, bare names against PATH
pub fn resolve_binary(binary: &str) -> Option<PathBuf> {
    if binary.trim().is_empty() {
        return None;
    }
    let candidate = Path::new(binary);
    if binary.contains('/') || binary.contains(std::path::MAIN_SEPARATOR) {
        return candidate.exists().then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(binary))
        .find(|path| path.is_file())
}

fn spawn_stream(binary: &str) -> Result<Child> {
    ProcessCommand::new(binary)
        .arg("stream")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn '{} stream'", binary))
}

/// Owns the child for its whole life: pumps output, reports exits, respawns
async fn supervise(
    inner: Arc<Inner>,
    mut child: Child,
    options: StreamOptions,
    cancel: CancellationToken,
    generation: u64,
) {
    let mut backoff = options.reconnect.map(ReconnectState::new);

    loop {
        match pump(&inner, &mut child, &cancel, backoff.as_mut()).await {
            PumpOutcome::Cancelled => {
                terminate(&mut child).await;
                break;
            }
            PumpOutcome::Exited(code) => {
                tracing::warn!(binary = %inner.binary, code = ?code, "stream process exited");
                let Some(state) = backoff.as_mut() else {
                    inner.release(generation);
                    inner.hub.publish(BridgeEvent::Exit(code));
                    break;
                };
                inner.hub.publish(BridgeEvent::Exit(code));

                match respawn(&inner, state, &cancel, generation).await {
                    Some(next) => child = next,
                    None => {
                        inner.release(generation);
                        break;
                    }
                }
            }
        }
    }
}

/// Forward stdout lines and stderr chunks until the child exits or we're cancelled
async fn pump(
    inner: &Arc<Inner>,
    child: &mut Child,
    cancel: &CancellationToken,
    mut backoff: Option<&mut ReconnectState>,
) -> PumpOutcome {
    let stderr_task = child.stderr.take().map(|mut stderr| {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                        tracing::debug!(stderr = %chunk.trim_end(), "stream stderr");
                        inner.hub.publish(BridgeEvent::Stderr(chunk));
                    }
                }
            }
        })
    });

    if let Some(stdout) = child.stdout.take() {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(task) = &stderr_task {
                        task.abort();
                    }
                    return PumpOutcome::Cancelled;
                }
                read = reader.read_until(b'\n', &mut buf) => match read {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = decode_line(&buf);
                        if inner.hub.publish_line(&line) {
                            if let Some(state) = backoff.as_deref_mut() {
                                state.reset();
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed reading stream stdout");
                        break;
                    }
                },
            }
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            if let Some(task) = &stderr_task {
                task.abort();
            }
            return PumpOutcome::Cancelled;
        }
        status = child.wait() => status,
    };

    // let stderr drain so its chunks land before the exit notification; a
    // grandchild holding the pipe open must not stall the supervisor
    if let Some(mut task) = stderr_task {
        tokio::select! {
            _ = cancel.cancelled() => {
                task.abort();
                return PumpOutcome::Cancelled;
            }
            drained = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task) => {
                if drained.is_err() {
                    tracing::debug!("stream stderr still open after exit, not waiting for it");
                    task.abort();
                }
            }
        }
    }

    match status {
        Ok(status) => PumpOutcome::Exited(status.code()),
        Err(e) => {
            tracing::warn!(error = %e, "failed waiting for stream process");
            PumpOutcome::Exited(None)
        }
    }
}

/// One stdout line without its terminator. Bytes that aren't UTF-8 become
/// replacement characters, which leaves the line unparseable rather than fatal.
fn decode_line(buf: &[u8]) -> String {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Ask the child to exit with SIGTERM, then kill it if it lingers
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: kill(2) with a pid we spawned and have not reaped yet
        let sent = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0;
        if sent {
            match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                Ok(status) => {
                    tracing::debug!(status = ?status, "stream process terminated");
                    return;
                }
                Err(_) => tracing::warn!("stream process ignored SIGTERM, killing it"),
            }
        }
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "stream process already gone");
    }
    let _ = child.wait().await;
}

/// Wait out the backoff and spawn again; None when cancelled or out of attempts
async fn respawn(
    inner: &Arc<Inner>,
    state: &mut ReconnectState,
    cancel: &CancellationToken,
    generation: u64,
) -> Option<Child> {
    loop {
        let Some((attempt, delay)) = state.next_attempt() else {
            let message = format!(
                "giving up on stream after {} reconnect attempts",
                state.attempt_count()
            );
            tracing::error!(binary = %inner.binary, "{}", message);
            // subscribers must see the slot free once they hear about it
            inner.release(generation);
            inner.hub.publish(BridgeEvent::Error(message));
            return None;
        };

        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting stream");
        inner
            .hub
            .publish(BridgeEvent::Reconnecting { attempt, delay });

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        match spawn_stream(&inner.binary) {
            Ok(child) => {
                tracing::info!(attempt, pid = ?child.id(), "stream process respawned");
                inner.hub.publish(BridgeEvent::Reconnected { attempt });
                return Some(child);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "stream respawn failed");
                inner.hub.publish(BridgeEvent::Error(format!("{:#}", e)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"{\"event\":\"connected\"}\r\n"), "{\"event\":\"connected\"}");
        assert_eq!(decode_line(b"tail without newline"), "tail without newline");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[test]
    fn test_decode_line_replaces_invalid_utf8() {
        let line = decode_line(b"\xff\xfe garbage\n");
        assert!(line.ends_with(" garbage"), "{}", line);
        assert!(line.contains('\u{FFFD}'));
    }
}
