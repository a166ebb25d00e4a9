// ABOUTME: Per-account gateway: runs the bridge's stream and feeds its notes to the inbound pipeline.
// ABOUTME: Tracks Stopped/Starting/Running/Reconnecting, filters mention-only traffic, and drops duplicate notes.

use anyhow::Result;
use mkclaw_bridge::{
    BridgeEvent, EventFilter, EventKind, EventReceiver, MisskeyCli, NotePayload, ReconnectPolicy,
    StreamEvent, StreamOptions,
};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::inbound::InboundPipeline;

/// How many recent note ids a gateway remembers for deduplication
pub const DEDUP_CAPACITY: usize = 512;

/// Connection lifecycle of one account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Stopped,
    Starting,
    Running,
    Reconnecting,
}

impl GatewayState {
    /// State after a lifecycle notification, or None to stay put.
    /// `process_held` is whether the bridge still holds a stream process.
    pub fn after(self, event: &BridgeEvent, process_held: bool) -> Option<GatewayState> {
        if self == GatewayState::Stopped {
            return None;
        }
        match event {
            BridgeEvent::Reconnecting { .. } => Some(GatewayState::Reconnecting),
            BridgeEvent::Reconnected { .. } => Some(GatewayState::Running),
            BridgeEvent::Exit(_) | BridgeEvent::Error(_) if !process_held => {
                Some(GatewayState::Stopped)
            }
            _ => None,
        }
    }
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GatewayState::Stopped => "stopped",
            GatewayState::Starting => "starting",
            GatewayState::Running => "running",
            GatewayState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Bounded memory of recently delivered note ids; the oldest id is
/// forgotten first once full
pub struct NoteDeduplicator {
    seen: HashSet<String>,
    order: VecDeque<String>,
    max_size: usize,
}

impl NoteDeduplicator {
    pub fn new(max_size: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::with_capacity(max_size),
            max_size: max_size.max(1),
        }
    }

    /// True the first time an id is seen
    pub fn check_and_mark(&mut self, note_id: &str) -> bool {
        if self.seen.contains(note_id) {
            return false;
        }
        if self.order.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(note_id.to_string());
        self.order.push_back(note_id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Decides which stream events reach the inbound pipeline and logs the rest
pub struct StreamRouter {
    account_id: String,
    mention_only: bool,
    dedup: NoteDeduplicator,
}

impl StreamRouter {
    pub fn new(account_id: impl Into<String>, mention_only: bool) -> Self {
        Self {
            account_id: account_id.into(),
            mention_only,
            dedup: NoteDeduplicator::new(DEDUP_CAPACITY),
        }
    }

    /// The note payload to deliver for this event, if any
    pub fn route(&mut self, event: &StreamEvent) -> Option<NotePayload> {
        let account_id = &self.account_id;
        match &event.kind {
            EventKind::Note | EventKind::Mention => {
                let Some(payload) = event.note_payload() else {
                    tracing::debug!(account_id = %account_id, kind = %event.kind, "note event without a usable note");
                    return None;
                };
                if event.kind == EventKind::Note && self.mention_only && !payload.note.is_direct() {
                    tracing::trace!(account_id = %account_id, note_id = %payload.note.id, "mention-only: skipping timeline note");
                    return None;
                }
                if !self.dedup.check_and_mark(&payload.note.id) {
                    tracing::debug!(account_id = %account_id, note_id = %payload.note.id, "duplicate note, already delivered");
                    return None;
                }
                Some(payload)
            }
            EventKind::Notification => {
                match event.notification_payload() {
                    Some(n) => tracing::info!(
                        account_id = %account_id,
                        notification_type = %n.notification_type,
                        user = %n.user.as_ref().map(|u| u.handle()).unwrap_or_default(),
                        "notification"
                    ),
                    None => tracing::info!(account_id = %account_id, "notification"),
                }
                None
            }
            EventKind::Followed => {
                let user = event
                    .followed_payload()
                    .map(|f| f.user.handle())
                    .unwrap_or_default();
                tracing::info!(account_id = %account_id, user = %user, "followed");
                None
            }
            EventKind::Error => {
                let payload = event.error_payload();
                tracing::error!(
                    account_id = %account_id,
                    code = %payload.as_ref().map(|p| p.code.as_str()).unwrap_or(""),
                    detail = %payload.as_ref().map(|p| p.detail.as_str()).unwrap_or(""),
                    "stream reported an error"
                );
                None
            }
            EventKind::Connected => {
                tracing::info!(account_id = %account_id, "stream connected");
                None
            }
            EventKind::Disconnected => {
                tracing::warn!(account_id = %account_id, data = %event.data, "stream disconnected");
                None
            }
            EventKind::Reconnecting => {
                tracing::info!(account_id = %account_id, data = %event.data, "stream reconnecting upstream");
                None
            }
            other => {
                tracing::trace!(account_id = %account_id, kind = %other, "ignoring stream event");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GatewayOptions {
    pub mention_only: bool,
    /// None disables respawning after the stream exits
    pub reconnect: Option<ReconnectPolicy>,
}

struct ConsumerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One account's connection: the stream process plus the task consuming it.
/// Deliveries for an account run one at a time, in arrival order.
pub struct Gateway {
    account_id: String,
    cli: MisskeyCli,
    options: GatewayOptions,
    state: Arc<Mutex<GatewayState>>,
    task: Mutex<Option<ConsumerTask>>,
}

impl Gateway {
    pub fn new(account_id: impl Into<String>, cli: MisskeyCli, options: GatewayOptions) -> Self {
        Self {
            account_id: account_id.into(),
            cli,
            options,
            state: Arc::new(Mutex::new(GatewayState::Stopped)),
            task: Mutex::new(None),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn cli(&self) -> &MisskeyCli {
        &self.cli
    }

    pub fn state(&self) -> GatewayState {
        *lock(&self.state)
    }

    /// Start the stream and the consumer task. Fails, leaving the gateway
    /// Stopped, when the binary is missing or the stream won't start.
    pub fn start(&self, pipeline: InboundPipeline) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if *state != GatewayState::Stopped {
                anyhow::bail!("gateway for account '{}' is already {}", self.account_id, *state);
            }
            *state = GatewayState::Starting;
        }

        if !self.cli.is_available() {
            self.set_state(GatewayState::Stopped);
            anyhow::bail!(
                "CLI binary '{}' not found; set plugins.entries.misskey.config.cliBinary to the path of the 'what' binary",
                self.cli.binary()
            );
        }

        let stream_rx = self.cli.subscribe(EventFilter::AnyStream);
        let lifecycle_rx = self.cli.subscribe(EventFilter::Lifecycle);
        let started = self.cli.start_stream(StreamOptions {
            reconnect: self.options.reconnect.clone(),
        });
        if !started {
            self.set_state(GatewayState::Stopped);
            anyhow::bail!("failed to start stream for account '{}'", self.account_id);
        }
        self.set_state(GatewayState::Running);
        tracing::info!(account_id = %self.account_id, binary = %self.cli.binary(), "gateway running");

        let cancel = CancellationToken::new();
        let consumer = Consumer {
            cli: self.cli.clone(),
            state: Arc::clone(&self.state),
            router: StreamRouter::new(self.account_id.clone(), self.options.mention_only),
            pipeline,
            stream_rx,
            lifecycle_rx,
        };
        let handle = tokio::spawn(consumer.run(cancel.clone()));
        *lock(&self.task) = Some(ConsumerTask { cancel, handle });
        Ok(())
    }

    /// Stop the stream and wait for the consumer task to finish. Idempotent.
    pub async fn stop(&self) {
        self.set_state(GatewayState::Stopped);
        self.cli.stop_stream();
        let task = lock(&self.task).take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                tracing::warn!(account_id = %self.account_id, error = %e, "gateway consumer task failed");
            }
            tracing::info!(account_id = %self.account_id, "gateway stopped");
        }
    }

    fn set_state(&self, next: GatewayState) {
        *lock(&self.state) = next;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Consumer {
    cli: MisskeyCli,
    state: Arc<Mutex<GatewayState>>,
    router: StreamRouter,
    pipeline: InboundPipeline,
    stream_rx: EventReceiver,
    lifecycle_rx: EventReceiver,
}

impl Consumer {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.lifecycle_rx.recv() => match event {
                    Some(event) => {
                        if self.on_lifecycle(&event) == GatewayState::Stopped {
                            // the stream is gone for good; deliver what it already sent
                            while let Some(event) = self.stream_rx.try_recv() {
                                if !self.deliver(event, &cancel).await {
                                    break;
                                }
                            }
                            tracing::info!(account_id = %self.pipeline.account_id(), "stream ended, gateway stopped");
                            break;
                        }
                    }
                    None => break,
                },
                event = self.stream_rx.recv() => match event {
                    Some(event) => {
                        if !self.deliver(event, &cancel).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }

    /// Route and deliver one event; false when cancelled mid-delivery
    async fn deliver(&mut self, event: BridgeEvent, cancel: &CancellationToken) -> bool {
        let BridgeEvent::Stream(event) = event else {
            return true;
        };
        let Some(payload) = self.router.route(&event) else {
            return true;
        };
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = self.pipeline.handle(&payload) => true,
        }
    }

    /// Log a lifecycle notification and apply it; returns the resulting state
    fn on_lifecycle(&self, event: &BridgeEvent) -> GatewayState {
        let account_id = self.pipeline.account_id();
        match event {
            BridgeEvent::Stderr(chunk) => {
                tracing::warn!(account_id = %account_id, stderr = %chunk.trim_end(), "stream stderr")
            }
            BridgeEvent::Error(message) => {
                tracing::error!(account_id = %account_id, error = %message, "stream error")
            }
            BridgeEvent::Exit(code) => {
                tracing::warn!(account_id = %account_id, code = ?code, "stream process exited")
            }
            BridgeEvent::Reconnecting { attempt, delay } => tracing::warn!(
                account_id = %account_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "stream reconnecting"
            ),
            BridgeEvent::Reconnected { attempt } => {
                tracing::info!(account_id = %account_id, attempt, "stream reconnected")
            }
            BridgeEvent::Stream(_) => {}
        }

        let mut state = lock(&self.state);
        if let Some(next) = state.after(event, self.cli.is_running()) {
            let previous = *state;
            if next != previous {
                tracing::info!(account_id = %account_id, from = %previous, to = %next, "gateway state changed");
                *state = next;
            }
        }
        *state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn note_event(kind: &str, id: &str, visibility: &str) -> StreamEvent {
        StreamEvent {
            timestamp: String::new(),
            kind: EventKind::from(kind),
            data: json!({
                "note": {
                    "id": id,
                    "text": "hello",
                    "visibility": visibility,
                    "user": {"id": "u1", "username": "alice"}
                }
            }),
        }
    }

    #[test]
    fn test_dedup_evicts_oldest() {
        let mut dedup = NoteDeduplicator::new(2);
        assert!(dedup.check_and_mark("a"));
        assert!(!dedup.check_and_mark("a"));
        assert!(dedup.check_and_mark("b"));
        assert!(dedup.check_and_mark("c"));
        assert_eq!(dedup.len(), 2);
        // "a" was evicted, "b" and "c" are remembered
        assert!(dedup.check_and_mark("a"));
        assert!(!dedup.check_and_mark("c"));
    }

    #[test]
    fn test_router_delivers_notes_and_mentions() {
        let mut router = StreamRouter::new("default", false);
        assert!(router.route(&note_event("note", "n1", "public")).is_some());
        assert!(router.route(&note_event("mention", "n2", "home")).is_some());
    }

    #[test]
    fn test_router_mention_only_suppresses_timeline_notes() {
        let mut router = StreamRouter::new("default", true);
        assert!(router.route(&note_event("note", "n1", "public")).is_none());
        assert!(router.route(&note_event("note", "n2", "specified")).is_some());
        assert!(router.route(&note_event("mention", "n3", "public")).is_some());
    }

    #[test]
    fn test_router_delivers_duplicate_once() {
        let mut router = StreamRouter::new("default", false);
        assert!(router.route(&note_event("note", "n1", "public")).is_some());
        assert!(router.route(&note_event("mention", "n1", "public")).is_none());
    }

    #[test]
    fn test_router_ignores_non_note_events() {
        let mut router = StreamRouter::new("default", false);
        let event = StreamEvent {
            timestamp: String::new(),
            kind: EventKind::Notification,
            data: json!({"notificationType": "reaction", "id": "x"}),
        };
        assert!(router.route(&event).is_none());
    }

    #[test]
    fn test_state_transitions() {
        let reconnecting = BridgeEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(2),
        };
        assert_eq!(
            GatewayState::Running.after(&reconnecting, true),
            Some(GatewayState::Reconnecting)
        );
        assert_eq!(
            GatewayState::Reconnecting.after(&BridgeEvent::Reconnected { attempt: 1 }, true),
            Some(GatewayState::Running)
        );
        // exit while the bridge respawns keeps the current state
        assert_eq!(GatewayState::Running.after(&BridgeEvent::Exit(Some(1)), true), None);
        assert_eq!(
            GatewayState::Running.after(&BridgeEvent::Exit(Some(1)), false),
            Some(GatewayState::Stopped)
        );
        assert_eq!(
            GatewayState::Reconnecting.after(&BridgeEvent::Error("giving up".into()), false),
            Some(GatewayState::Stopped)
        );
        assert_eq!(GatewayState::Stopped.after(&reconnecting, true), None);
    }
}
