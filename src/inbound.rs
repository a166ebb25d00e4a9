// ABOUTME: Inbound delivery pipeline: note -> route -> envelope -> session -> agent -> reply.
// ABOUTME: Each step calls a HostRuntime service; failures are logged per note and never propagate.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use mkclaw_bridge::event::parse_timestamp;
use mkclaw_bridge::{CommandResult, MisskeyCli, Note, NotePayload, NoteUser, ReplyOptions, Visibility};
use mkclaw_core::config::CHANNEL_ID;
use mkclaw_core::{
    ChatType, Envelope, HostRuntime, InboundContext, ReplyPayload, ReplySink, RouteRequest,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Channel label shown in envelopes
pub const CHANNEL_LABEL: &str = "Misskey";
/// Conversation id for group notes that arrived without a stream channel
pub const DEFAULT_CONVERSATION: &str = "timeline";

/// `Display Name (@user)` or `Display Name (@user@host)` for federated authors
pub fn sender_label(user: &NoteUser) -> String {
    format!("{} ({})", user.display_name(), user.handle())
}

pub fn chat_type_of(note: &Note) -> ChatType {
    if note.is_direct() {
        ChatType::Direct
    } else {
        ChatType::Group
    }
}

/// Audience of a direct conversation: the sender first, then the declared
/// recipients in order, without duplicates or blanks
pub fn direct_recipients(sender_id: &str, visible_user_ids: &[String]) -> Vec<String> {
    let mut recipients: Vec<String> = Vec::with_capacity(visible_user_ids.len() + 1);
    for id in std::iter::once(sender_id).chain(visible_user_ids.iter().map(String::as_str)) {
        let id = id.trim();
        if !id.is_empty() && !recipients.iter().any(|r| r == id) {
            recipients.push(id.to_string());
        }
    }
    recipients
}

/// Options for replying into a conversation. Direct conversations stay
/// restricted to their recipients.
pub fn reply_options(chat_type: ChatType, recipients: &[String]) -> ReplyOptions {
    match chat_type {
        ChatType::Direct => ReplyOptions {
            visibility: Some(Visibility::Specified),
            visible_user_ids: recipients.to_vec(),
            ..Default::default()
        },
        ChatType::Group => ReplyOptions::default(),
    }
}

/// Delivers inbound notes for one account to the host
pub struct InboundPipeline {
    account_id: String,
    cli: MisskeyCli,
    host: Arc<dyn HostRuntime>,
    session_store: PathBuf,
}

impl InboundPipeline {
    pub fn new(
        account_id: impl Into<String>,
        cli: MisskeyCli,
        host: Arc<dyn HostRuntime>,
        session_store: PathBuf,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            cli,
            host,
            session_store,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Deliver one note, logging instead of returning any failure.
    /// Returns whether the note was handed to the agent pipeline.
    pub async fn handle(&self, payload: &NotePayload) -> bool {
        match self.deliver(payload).await {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::error!(
                    account_id = %self.account_id,
                    note_id = %payload.note.id,
                    error = %format!("{:#}", e),
                    "inbound delivery failed"
                );
                false
            }
        }
    }

    /// Run the delivery steps for one note. Ok(false) means the note was skipped.
    pub async fn deliver(&self, payload: &NotePayload) -> Result<bool> {
        let note = &payload.note;
        let Some(body) = note.body() else {
            tracing::debug!(account_id = %self.account_id, note_id = %note.id, "skipping note without text");
            return Ok(false);
        };

        let chat_type = chat_type_of(note);
        let sender_id = note.author.peer_id();
        let recipients = match chat_type {
            ChatType::Direct => direct_recipients(&sender_id, &note.visible_user_ids),
            ChatType::Group => Vec::new(),
        };
        let conversation = match chat_type {
            ChatType::Direct => sender_id.clone(),
            ChatType::Group => payload
                .channel
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_CONVERSATION.to_string()),
        };

        let route = self
            .host
            .resolve_route(&RouteRequest {
                channel: CHANNEL_ID.to_string(),
                account_id: self.account_id.clone(),
                chat_type,
                peer: conversation.clone(),
            })
            .context("Failed to resolve route")?;

        let from = sender_label(&note.author);
        let timestamp = parse_timestamp(&note.created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let envelope = self.host.format_envelope(&Envelope {
            channel: CHANNEL_LABEL.to_string(),
            from: from.clone(),
            timestamp,
            body: body.to_string(),
        });

        let ctx = self.host.finalize_inbound(InboundContext {
            body: envelope,
            raw_body: body.to_string(),
            from,
            sender_id,
            sender_name: note.author.display_name().to_string(),
            sender_username: note.author.username.clone(),
            channel: CHANNEL_ID.to_string(),
            account_id: self.account_id.clone(),
            chat_type,
            conversation,
            session_key: route.session_key.clone(),
            message_id: note.id.clone(),
            reply_to_id: note.parent_reply_id.clone(),
            timestamp,
            recipients: recipients.clone(),
        });

        self.host
            .record_session(&self.session_store, &route, &ctx)
            .await
            .context("Failed to record session")?;

        tracing::info!(
            account_id = %self.account_id,
            note_id = %note.id,
            chat_type = %chat_type,
            session_key = %route.session_key,
            "dispatching inbound note"
        );

        let sink = Arc::new(NoteReplySink {
            cli: self.cli.clone(),
            account_id: self.account_id.clone(),
            note_id: note.id.clone(),
            options: reply_options(chat_type, &recipients),
        });
        self.host
            .dispatch_reply(ctx, sink)
            .await
            .context("Agent dispatch failed")?;
        Ok(true)
    }
}

/// Posts agent replies as replies to the originating note
pub struct NoteReplySink {
    cli: MisskeyCli,
    account_id: String,
    note_id: String,
    options: ReplyOptions,
}

#[async_trait]
impl ReplySink for NoteReplySink {
    async fn deliver(&self, reply: ReplyPayload) -> Result<()> {
        let text = reply.text.trim();
        if text.is_empty() {
            tracing::debug!(account_id = %self.account_id, note_id = %self.note_id, "empty agent reply, nothing to send");
            return Ok(());
        }

        let result = self.cli.reply(&self.note_id, text, &self.options).await;
        if let Some(error) = result.error_message() {
            anyhow::bail!("reply to note {} failed: {}", self.note_id, error);
        }
        if let CommandResult::Json(value) = &result {
            tracing::info!(
                account_id = %self.account_id,
                note_id = %self.note_id,
                reply_id = %value.get("id").and_then(|v| v.as_str()).unwrap_or("?"),
                "reply posted"
            );
        }
        Ok(())
    }
}
