// ABOUTME: Data exchanged between channel plugins and the host runtime.
// ABOUTME: Routing requests, envelopes, inbound contexts, outbound requests, tool and command results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

// =============================================================================
// Channel description
// =============================================================================

/// Conversation shape of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Direct => "direct",
            ChatType::Group => "group",
        }
    }
}

impl fmt::Display for ChatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a channel presents itself to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMeta {
    pub id: String,
    pub label: String,
    pub selection_label: String,
    pub docs_path: String,
    pub blurb: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCapabilities {
    pub chat_types: Vec<ChatType>,
}

// =============================================================================
// Inbound
// =============================================================================

/// Input to the host's route resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    pub channel: String,
    pub account_id: String,
    pub chat_type: ChatType,
    /// Sender id for direct messages, conversation id for group messages
    pub peer: String,
}

/// Where an inbound message is routed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub agent_id: String,
    pub account_id: String,
    pub session_key: String,
}

/// Raw parts of the line an agent sees for one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Channel label, e.g. "Misskey"
    pub channel: String,
    pub from: String,
    pub timestamp: DateTime<Utc>,
    pub body: String,
}

/// Everything the host needs to hand one inbound message to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundContext {
    /// Envelope-formatted text
    pub body: String,
    pub raw_body: String,
    /// Human-readable sender label
    pub from: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_username: String,
    pub channel: String,
    pub account_id: String,
    pub chat_type: ChatType,
    /// Conversation the message belongs to (peer of the route)
    pub conversation: String,
    pub session_key: String,
    /// Id of the inbound message on its service
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Restricted audience for direct conversations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
}

/// An agent's answer to an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub text: String,
}

impl ReplyPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Host request to send text through a channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundText {
    #[serde(default)]
    pub account_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub reply_to_note_id: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub visible_user_ids: Vec<String>,
}

/// Host request to send a file through a channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMedia {
    #[serde(default)]
    pub account_id: Option<String>,
    pub path: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
}

/// Outcome of an outbound send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResult {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

// =============================================================================
// Tools and commands
// =============================================================================

/// Result of an agent tool call: textual JSON content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn json(value: &Value) -> Self {
        Self {
            content: value.to_string(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: json!({ "error": message.into() }).to_string(),
            is_error: true,
        }
    }
}

/// Invocation of a slash command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandContext {
    pub sender_id: Option<String>,
    pub channel: Option<String>,
    /// Everything after the command name
    pub args: String,
}

impl CommandContext {
    pub fn new(sender_id: Option<&str>, args: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.map(str::to_string),
            channel: None,
            args: args.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub text: String,
}

impl CommandReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}
