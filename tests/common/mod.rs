// ABOUTME: Shared helpers for plugin integration tests.
// ABOUTME: Fake `what` scripts, JSONL note lines, and a HostRuntime that records what it is handed.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use mkclaw_core::{
    Envelope, HostRuntime, InboundContext, ReplyPayload, ReplySink, Route, RouteRequest,
};
use serde_json::json;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Write an executable `/bin/sh` script named `name` into `dir`
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("stat script").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");
    path
}

/// A fake CLI that prints `lines` for `stream` and then stays alive; every
/// other subcommand logs its argv (one arg per line) to `argv_log` and
/// prints a JSON note
pub fn fake_cli(dir: &Path, lines: &[String], argv_log: &Path) -> PathBuf {
    let body = format!(
        "if [ \"$1\" = \"stream\" ]; then\ncat <<'JSONL'\n{}\nJSONL\nexec sleep 30\nfi\nfor a in \"$@\"; do echo \"$a\" >> '{}'; done\necho '{{\"id\":\"reply1\"}}'",
        lines.join("\n"),
        argv_log.display()
    );
    write_script(dir, "what", &body)
}

/// One `note`/`mention` stream line
pub fn note_line(kind: &str, id: &str, visibility: &str, text: &str, visible_user_ids: &[&str]) -> String {
    json!({
        "ts": "2024-05-01T12:00:00.000+0900",
        "event": kind,
        "data": {
            "channel": if kind == "note" { json!("homeTimeline") } else { json!(null) },
            "note": {
                "id": id,
                "text": text,
                "visibility": visibility,
                "createdAt": "2024-05-01T03:00:00.000Z",
                "user": {"id": "U1", "username": "alice", "name": "Alice"},
                "visibleUserIds": visible_user_ids,
            }
        }
    })
    .to_string()
}

/// Wait until `check` holds, failing the test after five seconds
pub async fn wait_for<F: Fn() -> bool>(check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// HostRuntime double: records routes, sessions and contexts, and optionally
/// answers every message with a fixed reply. Session recording fails for the
/// note id in `fail_session_for`.
#[derive(Default)]
pub struct RecordingHost {
    pub reply: Option<String>,
    pub fail_session_for: Option<String>,
    pub routes: Mutex<Vec<RouteRequest>>,
    pub sessions: Mutex<Vec<(PathBuf, String)>>,
    pub contexts: Mutex<Vec<InboundContext>>,
    pub reply_errors: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            ..Default::default()
        }
    }

    pub fn failing_session_for(message_id: &str) -> Self {
        Self {
            fail_session_for: Some(message_id.to_string()),
            ..Default::default()
        }
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.contexts
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.message_id.clone())
            .collect()
    }

    pub fn delivered(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }
}

#[async_trait]
impl HostRuntime for RecordingHost {
    fn resolve_route(&self, request: &RouteRequest) -> Result<Route> {
        self.routes.lock().unwrap().push(request.clone());
        Ok(Route {
            agent_id: "main".to_string(),
            account_id: request.account_id.clone(),
            session_key: format!("{}:{}", request.chat_type, request.peer),
        })
    }

    fn format_envelope(&self, envelope: &Envelope) -> String {
        format!("[{}] {}: {}", envelope.channel, envelope.from, envelope.body)
    }

    async fn record_session(&self, store: &Path, route: &Route, ctx: &InboundContext) -> Result<()> {
        if self.fail_session_for.as_deref() == Some(ctx.message_id.as_str()) {
            anyhow::bail!("session store unavailable for {}", ctx.message_id);
        }
        self.sessions
            .lock()
            .unwrap()
            .push((store.to_path_buf(), route.session_key.clone()));
        Ok(())
    }

    async fn dispatch_reply(&self, ctx: InboundContext, sink: Arc<dyn ReplySink>) -> Result<()> {
        self.contexts.lock().unwrap().push(ctx);
        if let Some(reply) = &self.reply {
            if let Err(e) = sink.deliver(ReplyPayload::text(reply.clone())).await {
                self.reply_errors.lock().unwrap().push(e.to_string());
            }
        }
        Ok(())
    }
}

/// Records replies handed to it
#[derive(Default)]
pub struct CollectingSink {
    pub replies: Mutex<Vec<String>>,
}

#[async_trait]
impl ReplySink for CollectingSink {
    async fn deliver(&self, reply: ReplyPayload) -> Result<()> {
        self.replies.lock().unwrap().push(reply.text);
        Ok(())
    }
}
