// ABOUTME: Standalone HostRuntime used by the mkclaw binary when no agent host is present.
// ABOUTME: Builds route keys and envelopes, keeps sessions in memory, and runs an optional agent program.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mkclaw_core::config::AgentConfig;
use mkclaw_core::{
    Envelope, HostRuntime, InboundContext, ReplyPayload, ReplySink, Route, RouteRequest,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as ProcessCommand;

/// Agent id every route resolves to
pub const LOCAL_AGENT_ID: &str = "main";

/// What the local host remembers about one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    pub store: PathBuf,
    pub session_key: String,
    pub agent_id: String,
    pub account_id: String,
    pub last_message_id: String,
    pub last_from: String,
    pub message_count: u64,
    pub updated_at: DateTime<Utc>,
}

pub struct LocalHost {
    agent: AgentConfig,
    sessions: Mutex<HashMap<(PathBuf, String), SessionRecord>>,
}

impl LocalHost {
    pub fn new(agent: AgentConfig) -> Self {
        Self {
            agent,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of recorded sessions, ordered by session key
    pub fn sessions(&self) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.session_key.cmp(&b.session_key));
        records
    }

    /// Run the agent program with the context on stdin. Returns its trimmed
    /// stdout, or None when it failed or said nothing.
    async fn run_agent(&self, program: &str, ctx: &InboundContext) -> Result<Option<String>> {
        let input = serde_json::to_vec(ctx).context("Failed to serialize inbound context")?;

        let mut child = ProcessCommand::new(program)
            .args(&self.agent.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn agent program '{}'", program))?;

        // feed stdin alongside the wait so a program that never reads it still
        // falls under the timeout
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(&input).await {
                    tracing::debug!(program = %program, error = %e, "agent program closed stdin early");
                }
            }
        };

        let timeout = Duration::from_secs(self.agent.timeout_secs);
        let run = async {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };
        let output = tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "agent program '{}' timed out after {}s",
                    program,
                    timeout.as_secs()
                )
            })?
            .with_context(|| format!("Failed waiting for agent program '{}'", program))?;

        if !output.status.success() {
            tracing::warn!(
                program = %program,
                code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "agent program failed, no reply"
            );
            return Ok(None);
        }

        let reply = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!reply.is_empty()).then_some(reply))
    }
}

#[async_trait]
impl HostRuntime for LocalHost {
    fn resolve_route(&self, request: &RouteRequest) -> Result<Route> {
        Ok(Route {
            agent_id: LOCAL_AGENT_ID.to_string(),
            account_id: request.account_id.clone(),
            session_key: format!(
                "agent:{}:{}:{}:{}:{}",
                LOCAL_AGENT_ID, request.channel, request.account_id, request.chat_type, request.peer
            ),
        })
    }

    fn format_envelope(&self, envelope: &Envelope) -> String {
        format!(
            "[{} {} {}] {}",
            envelope.channel,
            envelope.from,
            envelope.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            envelope.body
        )
    }

    async fn record_session(&self, store: &Path, route: &Route, ctx: &InboundContext) -> Result<()> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = (store.to_path_buf(), route.session_key.clone());
        let message_count = sessions.get(&key).map_or(0, |r| r.message_count) + 1;
        sessions.insert(
            key,
            SessionRecord {
                store: store.to_path_buf(),
                session_key: route.session_key.clone(),
                agent_id: route.agent_id.clone(),
                account_id: route.account_id.clone(),
                last_message_id: ctx.message_id.clone(),
                last_from: ctx.from.clone(),
                message_count,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn dispatch_reply(&self, ctx: InboundContext, sink: Arc<dyn ReplySink>) -> Result<()> {
        let Some(program) = self.agent.program.as_deref().filter(|p| !p.trim().is_empty()) else {
            tracing::info!(
                session_key = %ctx.session_key,
                from = %ctx.from,
                body = %ctx.body,
                "inbound message (no agent program configured)"
            );
            return Ok(());
        };

        match self.run_agent(program, &ctx).await? {
            Some(reply) => {
                tracing::info!(session_key = %ctx.session_key, chars = reply.chars().count(), "agent replied");
                sink.deliver(ReplyPayload::text(reply)).await
            }
            None => {
                tracing::debug!(session_key = %ctx.session_key, "agent produced no reply");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mkclaw_core::ChatType;

    #[test]
    fn test_route_key() {
        let host = LocalHost::new(AgentConfig::default());
        let route = host
            .resolve_route(&RouteRequest {
                channel: "misskey".to_string(),
                account_id: "default".to_string(),
                chat_type: ChatType::Direct,
                peer: "9abc".to_string(),
            })
            .unwrap();
        assert_eq!(route.session_key, "agent:main:misskey:default:direct:9abc");
        assert_eq!(route.agent_id, "main");
    }

    #[test]
    fn test_envelope_format() {
        let host = LocalHost::new(AgentConfig::default());
        let text = host.format_envelope(&Envelope {
            channel: "Misskey".to_string(),
            from: "Alice (@alice)".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap(),
            body: "hello".to_string(),
        });
        assert_eq!(text, "[Misskey Alice (@alice) 2024-05-01 03:00:00 UTC] hello");
    }
}
