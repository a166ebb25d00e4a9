// ABOUTME: Event types for the CLI's JSONL stream and the bridge's own lifecycle.
// ABOUTME: StreamEvent is one parsed line; BridgeEvent is the union fanned out to subscribers.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::note::{Note, NoteUser};

/// Event kinds emitted by `what stream`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Note,
    Mention,
    Notification,
    Followed,
    UnreadNotification,
    Connected,
    Disconnected,
    Reconnecting,
    Error,
    ChannelEvent,
    TimelineEvent,
    MainEvent,
    Unknown,
    /// Any kind this crate doesn't know about yet
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Note => "note",
            EventKind::Mention => "mention",
            EventKind::Notification => "notification",
            EventKind::Followed => "followed",
            EventKind::UnreadNotification => "unreadNotification",
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Reconnecting => "reconnecting",
            EventKind::Error => "error",
            EventKind::ChannelEvent => "channel_event",
            EventKind::TimelineEvent => "timeline_event",
            EventKind::MainEvent => "main_event",
            EventKind::Unknown => "unknown",
            EventKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "note" => EventKind::Note,
            "mention" => EventKind::Mention,
            "notification" => EventKind::Notification,
            "followed" => EventKind::Followed,
            "unreadNotification" => EventKind::UnreadNotification,
            "connected" => EventKind::Connected,
            "disconnected" => EventKind::Disconnected,
            "reconnecting" => EventKind::Reconnecting,
            "error" => EventKind::Error,
            "channel_event" => EventKind::ChannelEvent,
            "timeline_event" => EventKind::TimelineEvent,
            "main_event" => EventKind::MainEvent,
            "unknown" => EventKind::Unknown,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(EventKind::from(s.as_str()))
    }
}

/// One line of the JSONL stream: `{"ts": ..., "event": ..., "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "ts", default)]
    pub timestamp: String,
    #[serde(rename = "event")]
    pub kind: EventKind,
    pub data: Value,
}

impl StreamEvent {
    /// Parse a single stdout line. Blank lines, invalid JSON, and objects
    /// without an event kind or an object payload yield None.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let event: StreamEvent = serde_json::from_str(line).ok()?;
        if !event.data.is_object() {
            return None;
        }
        Some(event)
    }

    /// Emission time. The CLI writes `%Y-%m-%dT%H:%M:%S%.3f%z`; RFC 3339 is accepted too.
    pub fn emitted_at(&self) -> Option<DateTime<FixedOffset>> {
        parse_timestamp(&self.timestamp)
    }

    /// Payload of `note` and `mention` events
    pub fn note_payload(&self) -> Option<NotePayload> {
        match self.kind {
            EventKind::Note | EventKind::Mention => {
                serde_json::from_value(self.data.clone()).ok()
            }
            _ => None,
        }
    }

    pub fn notification_payload(&self) -> Option<NotificationPayload> {
        match self.kind {
            EventKind::Notification => serde_json::from_value(self.data.clone()).ok(),
            _ => None,
        }
    }

    pub fn followed_payload(&self) -> Option<FollowedPayload> {
        match self.kind {
            EventKind::Followed => serde_json::from_value(self.data.clone()).ok(),
            _ => None,
        }
    }

    pub fn error_payload(&self) -> Option<StreamErrorPayload> {
        match self.kind {
            EventKind::Error => serde_json::from_value(self.data.clone()).ok(),
            _ => None,
        }
    }
}

/// Parse the timestamps found in the stream and on notes
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
}

/// `note` / `mention` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotePayload {
    /// Stream channel the note arrived on (absent for mentions)
    #[serde(default)]
    pub channel: Option<String>,
    pub note: Note,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(default)]
    pub notification_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user: Option<NoteUser>,
    #[serde(default)]
    pub note: Option<Note>,
    #[serde(default)]
    pub reaction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowedPayload {
    pub user: NoteUser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamErrorPayload {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub detail: String,
}

/// Everything the bridge reports to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// A parsed stdout line
    Stream(StreamEvent),
    /// A chunk of stderr output, forwarded as-is
    Stderr(String),
    /// The stream process exited (None when killed by a signal)
    Exit(Option<i32>),
    /// Binary missing, spawn failure, or reconnect attempts exhausted
    Error(String),
    /// About to wait `delay` before respawn attempt number `attempt`
    Reconnecting { attempt: u32, delay: Duration },
    /// Respawn attempt `attempt` produced a running process
    Reconnected { attempt: u32 },
}

impl BridgeEvent {
    pub fn stream_kind(&self) -> Option<&EventKind> {
        match self {
            BridgeEvent::Stream(event) => Some(&event.kind),
            _ => None,
        }
    }
}
