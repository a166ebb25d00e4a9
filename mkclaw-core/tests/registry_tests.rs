// ABOUTME: Tests for PluginRegistry lookup and account lifecycle coordination.
// ABOUTME: Uses in-memory channel, tool and command doubles.

use anyhow::Result;
use async_trait::async_trait;
use mkclaw_core::config::Config;
use mkclaw_core::{
    AccountConfig, AgentTool, ChannelCapabilities, ChannelMeta, ChannelPlugin, ChatType,
    CommandContext, CommandReply, Envelope, HostRuntime, InboundContext, OutboundMedia,
    OutboundText, PluginRegistrar, PluginRegistry, ReplySink, Route, RouteRequest, SendResult,
    SlashCommand, ToolResult,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

struct NullHost;

#[async_trait]
impl HostRuntime for NullHost {
    fn resolve_route(&self, request: &RouteRequest) -> Result<Route> {
        Ok(Route {
            agent_id: "main".to_string(),
            account_id: request.account_id.clone(),
            session_key: request.peer.clone(),
        })
    }

    fn format_envelope(&self, envelope: &Envelope) -> String {
        envelope.body.clone()
    }

    async fn record_session(
        &self,
        _store: &std::path::Path,
        _route: &Route,
        _ctx: &InboundContext,
    ) -> Result<()> {
        Ok(())
    }

    async fn dispatch_reply(&self, _ctx: InboundContext, _sink: Arc<dyn ReplySink>) -> Result<()> {
        Ok(())
    }
}

struct FakeChannel {
    meta: ChannelMeta,
    running: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl FakeChannel {
    fn new(fail_on: Option<&str>) -> Self {
        Self {
            meta: ChannelMeta {
                id: "misskey".to_string(),
                label: "Misskey".to_string(),
                selection_label: "Misskey".to_string(),
                docs_path: "/channels/misskey".to_string(),
                blurb: "test".to_string(),
                aliases: vec!["mk".to_string()],
            },
            running: Mutex::new(Vec::new()),
            fail_on: fail_on.map(str::to_string),
        }
    }
}

#[async_trait]
impl ChannelPlugin for FakeChannel {
    fn meta(&self) -> &ChannelMeta {
        &self.meta
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            chat_types: vec![ChatType::Direct, ChatType::Group],
        }
    }

    fn list_account_ids(&self, cfg: &Value) -> Vec<String> {
        Config::from_host_value(cfg).unwrap().list_account_ids()
    }

    fn resolve_account(&self, cfg: &Value, account_id: Option<&str>) -> AccountConfig {
        Config::from_host_value(cfg).unwrap().resolve_account(account_id)
    }

    async fn start_account(&self, account_id: &str, _host: Arc<dyn HostRuntime>) -> Result<()> {
        if self.fail_on.as_deref() == Some(account_id) {
            anyhow::bail!("binary missing");
        }
        self.running.lock().unwrap().push(account_id.to_string());
        Ok(())
    }

    async fn stop_account(&self, account_id: &str) -> Result<()> {
        self.running.lock().unwrap().retain(|a| a != account_id);
        Ok(())
    }

    fn running_accounts(&self) -> Vec<String> {
        self.running.lock().unwrap().clone()
    }

    async fn send_text(&self, _request: OutboundText) -> SendResult {
        SendResult::ok()
    }

    async fn send_media(&self, _request: OutboundMedia) -> SendResult {
        SendResult::ok()
    }
}

struct EchoTool;

#[async_trait]
impl AgentTool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo params"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }

    async fn call(&self, params: Value) -> ToolResult {
        ToolResult::json(&params)
    }
}

struct PingCommand;

#[async_trait]
impl SlashCommand for PingCommand {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Ping"
    }

    async fn run(&self, _ctx: CommandContext) -> CommandReply {
        CommandReply::text("pong")
    }
}

fn accounts_config() -> Value {
    json!({
        "channels": {"misskey": {"accounts": {
            "main": {"enabled": true},
            "off": {"enabled": false},
            "broken": {}
        }}}
    })
}

#[tokio::test]
async fn test_lookup_by_id_and_alias() {
    let mut registry = PluginRegistry::new(json!({}));
    registry.register_channel(Arc::new(FakeChannel::new(None)));

    assert!(registry.channel("misskey").is_some());
    assert!(registry.channel("mk").is_some());
    assert!(registry.channel("matrix").is_none());
    assert_eq!(registry.channel_ids(), vec!["misskey"]);
}

#[tokio::test]
async fn test_tools_and_commands() {
    let mut registry = PluginRegistry::new(json!({}));
    registry.register_tool(Arc::new(EchoTool));
    registry.register_command(Arc::new(PingCommand));

    let result = registry.call_tool("echo", json!({"a": 1})).await;
    assert_eq!(result.content, r#"{"a":1}"#);
    assert!(!result.is_error);

    let missing = registry.call_tool("nope", json!({})).await;
    assert!(missing.is_error);

    let reply = registry
        .run_command("/ping", CommandContext::new(None, ""))
        .await;
    assert_eq!(reply.text, "pong");

    let unknown = registry
        .run_command("nope", CommandContext::new(None, ""))
        .await;
    assert_eq!(unknown.text, "Unknown command: /nope");
}

#[tokio::test]
async fn test_start_all_skips_disabled_and_survives_failures() {
    let mut registry = PluginRegistry::new(accounts_config());
    let channel = Arc::new(FakeChannel::new(Some("broken")));
    registry.register_channel(channel.clone());

    let started = registry.start_all(Arc::new(NullHost), None).await;
    assert_eq!(started, 1);
    assert_eq!(channel.running_accounts(), vec!["main"]);

    registry.shutdown_all().await;
    assert!(channel.running_accounts().is_empty());
}

#[tokio::test]
async fn test_start_all_single_account() {
    let mut registry = PluginRegistry::new(json!({}));
    let channel = Arc::new(FakeChannel::new(None));
    registry.register_channel(channel.clone());

    assert_eq!(registry.start_all(Arc::new(NullHost), Some("other")).await, 0);
    assert_eq!(registry.start_all(Arc::new(NullHost), Some("default")).await, 1);
    assert_eq!(channel.running_accounts(), vec!["default"]);
}
