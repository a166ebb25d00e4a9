// ABOUTME: Capability traits a host runtime and its channel plugins implement.
// ABOUTME: HostRuntime services, ChannelPlugin, AgentTool, SlashCommand, and the PluginRegistrar surface.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::config::AccountConfig;
use crate::context::{
    ChannelCapabilities, ChannelMeta, CommandContext, CommandReply, Envelope, InboundContext,
    OutboundMedia, OutboundText, ReplyPayload, Route, RouteRequest, SendResult, ToolResult,
};

// =============================================================================
// Host services
// =============================================================================

/// Receives an agent's reply and delivers it back through the channel
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(&self, reply: ReplyPayload) -> Result<()>;
}

/// Services the host runtime offers to channel plugins. Every step of
/// inbound delivery goes through one of these.
#[async_trait]
pub trait HostRuntime: Send + Sync {
    /// Map channel, account and peer to an agent session
    fn resolve_route(&self, request: &RouteRequest) -> Result<Route>;

    /// Render the line an agent sees for one message
    fn format_envelope(&self, envelope: &Envelope) -> String;

    /// Last chance for the host to fill in or normalise context fields
    fn finalize_inbound(&self, ctx: InboundContext) -> InboundContext {
        ctx
    }

    /// Remember in the session store at `store` that `route`'s session saw this message
    async fn record_session(&self, store: &Path, route: &Route, ctx: &InboundContext) -> Result<()>;

    /// Run the agent for `ctx`; each reply it produces goes to `sink`
    async fn dispatch_reply(&self, ctx: InboundContext, sink: Arc<dyn ReplySink>) -> Result<()>;
}

// =============================================================================
// Plugin capabilities
// =============================================================================

/// A messaging channel: account management, gateway lifecycle, and outbound sends
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    fn meta(&self) -> &ChannelMeta;

    fn capabilities(&self) -> ChannelCapabilities;

    /// Configured account ids, read from the host config object
    fn list_account_ids(&self, cfg: &Value) -> Vec<String>;

    /// Settings for one account (`default` when `account_id` is None)
    fn resolve_account(&self, cfg: &Value, account_id: Option<&str>) -> AccountConfig;

    /// Start receiving for an account; inbound messages go to `host`
    async fn start_account(&self, account_id: &str, host: Arc<dyn HostRuntime>) -> Result<()>;

    async fn stop_account(&self, account_id: &str) -> Result<()>;

    /// Accounts with a live gateway
    fn running_accounts(&self) -> Vec<String>;

    async fn send_text(&self, request: OutboundText) -> SendResult;

    async fn send_media(&self, request: OutboundMedia) -> SendResult;
}

/// A function agents can call
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the parameters object
    fn parameters(&self) -> Value;

    /// Never fails: problems are reported in the result
    async fn call(&self, params: Value) -> ToolResult;
}

/// A `/name args` command users can run from chat
#[async_trait]
pub trait SlashCommand: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn accepts_args(&self) -> bool {
        false
    }

    fn requires_auth(&self) -> bool {
        false
    }

    async fn run(&self, ctx: CommandContext) -> CommandReply;
}

/// What a plugin's register function sees of the host
pub trait PluginRegistrar {
    /// The host configuration object
    fn config(&self) -> &Value;

    fn register_channel(&mut self, channel: Arc<dyn ChannelPlugin>);

    fn register_tool(&mut self, tool: Arc<dyn AgentTool>);

    fn register_command(&mut self, command: Arc<dyn SlashCommand>);
}
