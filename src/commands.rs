// ABOUTME: Slash commands for chat users: /mkpost posts a note, /mktl shows the latest timeline.
// ABOUTME: Both require auth; the plugin admin list decides who may run them.

use async_trait::async_trait;
use mkclaw_bridge::{CommandResult, MisskeyCli, PostOptions, TimelineKind};
use mkclaw_core::config::Config;
use mkclaw_core::{CommandContext, CommandReply, SlashCommand};
use serde_json::Value;
use std::sync::Arc;

/// Notes shown by /mktl
pub const TIMELINE_PREVIEW_LIMIT: u32 = 5;

const NOT_AUTHORIZED: &str = "Not authorized.";

/// First `max` characters of `text`
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// `/mkpost <text>`
pub struct PostCommand {
    cli: MisskeyCli,
    config: Arc<Config>,
}

impl PostCommand {
    pub fn new(cli: MisskeyCli, config: Arc<Config>) -> Self {
        Self { cli, config }
    }
}

#[async_trait]
impl SlashCommand for PostCommand {
    fn name(&self) -> &str {
        "mkpost"
    }

    fn description(&self) -> &str {
        "Post a note to Misskey (e.g. /mkpost Hello world)"
    }

    fn accepts_args(&self) -> bool {
        true
    }

    fn requires_auth(&self) -> bool {
        true
    }

    async fn run(&self, ctx: CommandContext) -> CommandReply {
        if !self.config.is_admin(ctx.sender_id.as_deref()) {
            tracing::warn!(sender = ?ctx.sender_id, command = "mkpost", "unauthorized command");
            return CommandReply::text(NOT_AUTHORIZED);
        }
        let text = ctx.args.trim();
        if text.is_empty() {
            return CommandReply::text("Usage: /mkpost <text>");
        }

        let result = self.cli.post(text, &PostOptions::default()).await;
        match result.error_message() {
            Some(error) => CommandReply::text(format!("Failed to post: {}", error)),
            None => CommandReply::text(format!("Posted: {}", truncate_chars(text, 100))),
        }
    }
}

/// `/mktl`
pub struct TimelineCommand {
    cli: MisskeyCli,
    config: Arc<Config>,
}

impl TimelineCommand {
    pub fn new(cli: MisskeyCli, config: Arc<Config>) -> Self {
        Self { cli, config }
    }
}

#[async_trait]
impl SlashCommand for TimelineCommand {
    fn name(&self) -> &str {
        "mktl"
    }

    fn description(&self) -> &str {
        "Fetch latest Misskey timeline"
    }

    fn requires_auth(&self) -> bool {
        true
    }

    async fn run(&self, ctx: CommandContext) -> CommandReply {
        if !self.config.is_admin(ctx.sender_id.as_deref()) {
            tracing::warn!(sender = ?ctx.sender_id, command = "mktl", "unauthorized command");
            return CommandReply::text(NOT_AUTHORIZED);
        }

        let result = self
            .cli
            .fetch_timeline(TimelineKind::Hybrid, TIMELINE_PREVIEW_LIMIT)
            .await;
        CommandReply::text(format_timeline(&result))
    }
}

/// One `@username: text` line per note
pub fn format_timeline(result: &CommandResult) -> String {
    if let Some(error) = result.error_message() {
        return format!("Failed: {}", error);
    }
    let CommandResult::Json(Value::Array(notes)) = result else {
        return result.to_content();
    };

    let lines: Vec<String> = notes
        .iter()
        .map(|note| {
            let username = note
                .pointer("/user/username")
                .and_then(|v| v.as_str())
                .unwrap_or("?");
            let text = note.get("text").and_then(|v| v.as_str()).unwrap_or("");
            format!("@{}: {}", username, truncate_chars(text, 80))
        })
        .collect();

    if lines.is_empty() {
        "(empty)".to_string()
    } else {
        lines.join("\n")
    }
}
