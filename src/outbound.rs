// ABOUTME: Outbound sends for the Misskey channel: text posts, replies, and media posts.
// ABOUTME: Failures come back as SendResult { ok: false } and are logged, never raised.

use anyhow::Result;
use mkclaw_bridge::{CommandResult, MediaPostOptions, MisskeyCli, PostOptions, ReplyOptions, Visibility};
use mkclaw_core::{OutboundMedia, OutboundText, SendResult};

/// Parse an optional visibility string; blank means unset
pub fn parse_visibility(raw: Option<&str>) -> Result<Option<Visibility>> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => Ok(Some(v.parse()?)),
        None => Ok(None),
    }
}

fn finish(result: CommandResult, action: &str, account_id: &str) -> SendResult {
    match result.error_message() {
        Some(error) => {
            tracing::error!(account_id = %account_id, action, error = %error, "send failed");
            SendResult::failed(error)
        }
        None => {
            tracing::debug!(account_id = %account_id, action, "send ok");
            SendResult::ok()
        }
    }
}

/// Post `request.text`, as a reply when a reply target is given
pub async fn send_text(cli: &MisskeyCli, account_id: &str, request: &OutboundText) -> SendResult {
    let text = request.text.trim();
    if text.is_empty() {
        return SendResult::failed("text is required");
    }
    let visibility = match parse_visibility(request.visibility.as_deref()) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(account_id = %account_id, error = %e, "send failed");
            return SendResult::failed(e.to_string());
        }
    };

    match request
        .reply_to_note_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
    {
        Some(note_id) => {
            let opts = ReplyOptions {
                visibility,
                visible_user_ids: request.visible_user_ids.clone(),
                ..Default::default()
            };
            finish(cli.reply(note_id, text, &opts).await, "reply", account_id)
        }
        None => {
            let opts = PostOptions {
                visibility,
                visible_user_ids: request.visible_user_ids.clone(),
                ..Default::default()
            };
            finish(cli.post(text, &opts).await, "post", account_id)
        }
    }
}

/// Upload a file and post it, with the caption as note text
pub async fn send_media(cli: &MisskeyCli, account_id: &str, request: &OutboundMedia) -> SendResult {
    if request.path.trim().is_empty() {
        return SendResult::failed("path is required");
    }
    let visibility = match parse_visibility(request.visibility.as_deref()) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(account_id = %account_id, error = %e, "media send failed");
            return SendResult::failed(e.to_string());
        }
    };
    let opts = MediaPostOptions {
        visibility,
        nsfw: request.sensitive,
        ..Default::default()
    };
    let caption = request
        .caption
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    finish(
        cli.post_with_media(&request.path, caption, &opts).await,
        "post-image",
        account_id,
    )
}
