// ABOUTME: Agent tools backed by the `what` CLI: post, timeline, search, react, notifications, note lookup.
// ABOUTME: Each tool validates its JSON params and returns the command result as JSON text.

use async_trait::async_trait;
use mkclaw_bridge::{MisskeyCli, PostOptions, TimelineKind, DEFAULT_LIMIT};
use mkclaw_core::{AgentTool, ToolResult};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::outbound::parse_visibility;

/// Upper bound accepted for `limit` params
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Post,
    Timeline,
    Search,
    React,
    Notifications,
    NoteShow,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        ToolKind::Post,
        ToolKind::Timeline,
        ToolKind::Search,
        ToolKind::React,
        ToolKind::Notifications,
        ToolKind::NoteShow,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Post => "misskey_post",
            ToolKind::Timeline => "misskey_timeline",
            ToolKind::Search => "misskey_search",
            ToolKind::React => "misskey_react",
            ToolKind::Notifications => "misskey_notifications",
            ToolKind::NoteShow => "misskey_note_show",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::Post => "Post a note to Misskey. Supports CW, visibility, reply, and quote.",
            ToolKind::Timeline => "Fetch the Misskey timeline (hybrid, local, global, or home).",
            ToolKind::Search => "Search notes on Misskey.",
            ToolKind::React => "Add a reaction to a Misskey note.",
            ToolKind::Notifications => "Fetch recent Misskey notifications.",
            ToolKind::NoteShow => "Show details of a specific Misskey note by ID.",
        }
    }

    pub fn parameters(&self) -> Value {
        match self {
            ToolKind::Post => json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Note text" },
                    "cw": { "type": "string", "description": "Content warning (optional)" },
                    "visibility": {
                        "type": "string",
                        "enum": ["public", "home", "followers", "specified"],
                        "description": "Visibility (default: public)"
                    },
                    "replyId": { "type": "string", "description": "Note ID to reply to (optional)" },
                    "quoteId": { "type": "string", "description": "Note ID to quote (optional)" }
                },
                "required": ["text"]
            }),
            ToolKind::Timeline => json!({
                "type": "object",
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": ["hybrid", "local", "global", "home"],
                        "description": "Timeline type (default: hybrid)"
                    },
                    "limit": { "type": "number", "description": "Number of notes to fetch (default: 10)" }
                }
            }),
            ToolKind::Search => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "limit": { "type": "number", "description": "Number of results (default: 10)" }
                },
                "required": ["query"]
            }),
            ToolKind::React => json!({
                "type": "object",
                "properties": {
                    "noteId": { "type": "string", "description": "Note ID to react to" },
                    "reaction": { "type": "string", "description": "Reaction emoji (e.g. :star:)" }
                },
                "required": ["noteId", "reaction"]
            }),
            ToolKind::Notifications => json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "number", "description": "Number of notifications (default: 10)" }
                }
            }),
            ToolKind::NoteShow => json!({
                "type": "object",
                "properties": {
                    "noteId": { "type": "string", "description": "Note ID" }
                },
                "required": ["noteId"]
            }),
        }
    }
}

/// One registered tool; all tools share the plugin's default bridge
pub struct MisskeyTool {
    kind: ToolKind,
    cli: MisskeyCli,
}

impl MisskeyTool {
    pub fn new(kind: ToolKind, cli: MisskeyCli) -> Self {
        Self { kind, cli }
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    async fn execute(&self, args: &Value) -> Result<ToolResult, String> {
        let result = match self.kind {
            ToolKind::Post => {
                let text = required_str(args, "text")?;
                let opts = PostOptions {
                    cw: optional_str(args, "cw"),
                    visibility: parse_visibility(optional_str(args, "visibility").as_deref())
                        .map_err(|e| e.to_string())?,
                    reply_id: optional_str(args, "replyId"),
                    quote_id: optional_str(args, "quoteId"),
                    ..Default::default()
                };
                self.cli.post(text, &opts).await
            }
            ToolKind::Timeline => {
                let kind = match optional_str(args, "type") {
                    Some(t) => t.parse::<TimelineKind>().map_err(|e| e.to_string())?,
                    None => TimelineKind::default(),
                };
                self.cli.fetch_timeline(kind, limit_param(args)?).await
            }
            ToolKind::Search => {
                let query = required_str(args, "query")?;
                self.cli.search(query, limit_param(args)?).await
            }
            ToolKind::React => {
                let note_id = required_str(args, "noteId")?;
                let reaction = required_str(args, "reaction")?;
                self.cli.react(note_id, reaction).await
            }
            ToolKind::Notifications => self.cli.fetch_notifications(limit_param(args)?).await,
            ToolKind::NoteShow => {
                let note_id = required_str(args, "noteId")?;
                self.cli.show_note(note_id).await
            }
        };

        Ok(ToolResult {
            content: result.to_content(),
            is_error: result.is_error(),
        })
    }
}

#[async_trait]
impl AgentTool for MisskeyTool {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn parameters(&self) -> Value {
        self.kind.parameters()
    }

    async fn call(&self, params: Value) -> ToolResult {
        tracing::info!(tool = %self.kind.name(), "tool call");
        match self.execute(&params).await {
            Ok(result) => {
                if result.is_error {
                    tracing::warn!(tool = %self.kind.name(), content = %result.content, "tool call failed");
                }
                result
            }
            Err(error) => {
                tracing::warn!(tool = %self.kind.name(), error = %error, "invalid tool params");
                ToolResult::error(error)
            }
        }
    }
}

/// The full tool set over one bridge
pub fn all_tools(cli: &MisskeyCli) -> Vec<Arc<dyn AgentTool>> {
    ToolKind::ALL
        .iter()
        .map(|kind| Arc::new(MisskeyTool::new(*kind, cli.clone())) as Arc<dyn AgentTool>)
        .collect()
}

fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str, String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required parameter: {}", name))
}

fn optional_str(args: &Value, name: &str) -> Option<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `limit` as a positive count, default 10, capped at 100
fn limit_param(args: &Value) -> Result<u32, String> {
    let Some(value) = args.get("limit").filter(|v| !v.is_null()) else {
        return Ok(DEFAULT_LIMIT);
    };
    let limit = value
        .as_f64()
        .filter(|n| n.is_finite() && *n >= 1.0)
        .ok_or_else(|| format!("Invalid limit: {}", value))?;
    Ok((limit as u32).min(MAX_LIMIT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_names_unique() {
        let mut names: Vec<_> = ToolKind::ALL.iter().map(|k| k.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 6);
    }

    #[test]
    fn test_required_params_listed_in_schema() {
        let schema = ToolKind::React.parameters();
        assert_eq!(schema["required"], json!(["noteId", "reaction"]));
        assert!(ToolKind::Timeline.parameters().get("required").is_none());
    }

    #[test]
    fn test_limit_param() {
        assert_eq!(limit_param(&json!({})), Ok(DEFAULT_LIMIT));
        assert_eq!(limit_param(&json!({"limit": null})), Ok(DEFAULT_LIMIT));
        assert_eq!(limit_param(&json!({"limit": 5})), Ok(5));
        assert_eq!(limit_param(&json!({"limit": 7.9})), Ok(7));
        assert_eq!(limit_param(&json!({"limit": 500})), Ok(MAX_LIMIT));
        assert!(limit_param(&json!({"limit": 0})).is_err());
        assert!(limit_param(&json!({"limit": "ten"})).is_err());
    }

    #[test]
    fn test_required_str_rejects_blank() {
        let args = json!({"text": "  ", "query": "rust"});
        assert_eq!(
            required_str(&args, "text"),
            Err("Missing required parameter: text".to_string())
        );
        assert_eq!(required_str(&args, "query"), Ok("rust"));
    }
}
