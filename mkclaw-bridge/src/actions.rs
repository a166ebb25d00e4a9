// ABOUTME: Argument builders for the CLI's action subcommands (post, reply, tl, react...).
// ABOUTME: Flags are appended only for options that are set; each action runs via run_command.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::bridge::MisskeyCli;
use crate::command::CommandResult;
use crate::note::Visibility;

/// Default page size for timeline, search and notification fetches
pub const DEFAULT_LIMIT: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOptions {
    #[serde(default)]
    pub cw: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub reply_id: Option<String>,
    #[serde(default)]
    pub quote_id: Option<String>,
    /// Recipients for `specified` visibility
    #[serde(default)]
    pub visible_user_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyOptions {
    #[serde(default)]
    pub cw: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub visible_user_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPostOptions {
    #[serde(default)]
    pub cw: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub nsfw: bool,
}

/// Timelines the CLI can fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineKind {
    #[default]
    Hybrid,
    Local,
    Global,
    Home,
}

impl TimelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineKind::Hybrid => "hybrid",
            TimelineKind::Local => "local",
            TimelineKind::Global => "global",
            TimelineKind::Home => "home",
        }
    }
}

impl fmt::Display for TimelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimelineKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid" => Ok(TimelineKind::Hybrid),
            "local" => Ok(TimelineKind::Local),
            "global" => Ok(TimelineKind::Global),
            "home" => Ok(TimelineKind::Home),
            other => anyhow::bail!(
                "unknown timeline '{}' (expected hybrid, local, global or home)",
                other
            ),
        }
    }
}

fn push_opt(args: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

fn push_visibility(args: &mut Vec<String>, visibility: Option<Visibility>) {
    push_opt(args, "--visibility", visibility.map(|v| v.as_str()));
}

fn push_recipients(args: &mut Vec<String>, ids: &[String]) {
    let ids: Vec<&str> = ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .collect();
    if !ids.is_empty() {
        args.push("--visible-users".to_string());
        args.push(ids.join(","));
    }
}

fn push_switch(args: &mut Vec<String>, flag: &str, on: bool) {
    if on {
        args.push(flag.to_string());
    }
}

pub fn post_args(text: &str, opts: &PostOptions) -> Vec<String> {
    let mut args = vec!["post".to_string(), text.to_string()];
    push_opt(&mut args, "--cw", opts.cw.as_deref());
    push_visibility(&mut args, opts.visibility);
    push_opt(&mut args, "--reply", opts.reply_id.as_deref());
    push_opt(&mut args, "--quote", opts.quote_id.as_deref());
    push_recipients(&mut args, &opts.visible_user_ids);
    args
}

pub fn reply_args(note_id: &str, text: &str, opts: &ReplyOptions) -> Vec<String> {
    let mut args = vec!["reply".to_string(), note_id.to_string(), text.to_string()];
    push_opt(&mut args, "--cw", opts.cw.as_deref());
    push_visibility(&mut args, opts.visibility);
    push_recipients(&mut args, &opts.visible_user_ids);
    args
}

pub fn upload_args(path: &str, opts: &UploadOptions) -> Vec<String> {
    let mut args = vec!["upload".to_string(), path.to_string()];
    push_opt(&mut args, "--name", opts.name.as_deref());
    push_opt(&mut args, "--folder", opts.folder.as_deref());
    push_switch(&mut args, "--nsfw", opts.nsfw);
    args
}

pub fn post_with_media_args(path: &str, text: Option<&str>, opts: &MediaPostOptions) -> Vec<String> {
    let mut args = vec!["post-image".to_string(), path.to_string()];
    if let Some(text) = text.filter(|t| !t.is_empty()) {
        args.push(text.to_string());
    }
    push_opt(&mut args, "--cw", opts.cw.as_deref());
    push_visibility(&mut args, opts.visibility);
    push_switch(&mut args, "--nsfw", opts.nsfw);
    args
}

pub fn show_note_args(note_id: &str) -> Vec<String> {
    vec!["show".to_string(), note_id.to_string()]
}

pub fn timeline_args(kind: TimelineKind, limit: u32) -> Vec<String> {
    vec![
        "tl".to_string(),
        kind.as_str().to_string(),
        "--limit".to_string(),
        limit.to_string(),
    ]
}

pub fn search_args(query: &str, limit: u32) -> Vec<String> {
    vec![
        "search".to_string(),
        query.to_string(),
        "--limit".to_string(),
        limit.to_string(),
    ]
}

pub fn react_args(note_id: &str, reaction: &str) -> Vec<String> {
    vec!["react".to_string(), note_id.to_string(), reaction.to_string()]
}

pub fn who_am_i_args() -> Vec<String> {
    vec!["me".to_string()]
}

pub fn notifications_args(limit: u32) -> Vec<String> {
    vec!["notif".to_string(), "--limit".to_string(), limit.to_string()]
}

pub fn delete_note_args(note_id: &str) -> Vec<String> {
    vec!["delete".to_string(), note_id.to_string()]
}

/// Presence check for required arguments
fn missing(field: &str, value: &str) -> Option<CommandResult> {
    value
        .trim()
        .is_empty()
        .then(|| CommandResult::error(format!("{} is required", field)))
}

impl MisskeyCli {
    pub async fn post(&self, text: &str, opts: &PostOptions) -> CommandResult {
        if let Some(err) = missing("text", text) {
            return err;
        }
        self.run_command(post_args(text, opts)).await
    }

    pub async fn reply(&self, note_id: &str, text: &str, opts: &ReplyOptions) -> CommandResult {
        if let Some(err) = missing("noteId", note_id).or_else(|| missing("text", text)) {
            return err;
        }
        self.run_command(reply_args(note_id, text, opts)).await
    }

    pub async fn upload(&self, path: &str, opts: &UploadOptions) -> CommandResult {
        if let Some(err) = missing("path", path) {
            return err;
        }
        self.run_command(upload_args(path, opts)).await
    }

    pub async fn post_with_media(
        &self,
        path: &str,
        text: Option<&str>,
        opts: &MediaPostOptions,
    ) -> CommandResult {
        if let Some(err) = missing("path", path) {
            return err;
        }
        self.run_command(post_with_media_args(path, text, opts)).await
    }

    pub async fn show_note(&self, note_id: &str) -> CommandResult {
        if let Some(err) = missing("noteId", note_id) {
            return err;
        }
        self.run_command(show_note_args(note_id)).await
    }

    pub async fn fetch_timeline(&self, kind: TimelineKind, limit: u32) -> CommandResult {
        self.run_command(timeline_args(kind, limit)).await
    }

    pub async fn search(&self, query: &str, limit: u32) -> CommandResult {
        if let Some(err) = missing("query", query) {
            return err;
        }
        self.run_command(search_args(query, limit)).await
    }

    pub async fn react(&self, note_id: &str, reaction: &str) -> CommandResult {
        if let Some(err) = missing("noteId", note_id).or_else(|| missing("reaction", reaction)) {
            return err;
        }
        self.run_command(react_args(note_id, reaction)).await
    }

    pub async fn who_am_i(&self) -> CommandResult {
        self.run_command(who_am_i_args()).await
    }

    pub async fn fetch_notifications(&self, limit: u32) -> CommandResult {
        self.run_command(notifications_args(limit)).await
    }

    pub async fn delete_note(&self, note_id: &str) -> CommandResult {
        if let Some(err) = missing("noteId", note_id) {
            return err;
        }
        self.run_command(delete_note_args(note_id)).await
    }
}
