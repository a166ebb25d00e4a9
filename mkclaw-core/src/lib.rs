// ABOUTME: Host-facing contracts for mkclaw channel plugins.
// ABOUTME: Capability traits, inbound context types, configuration, and the plugin registry.

pub mod config;
pub mod context;
pub mod paths;
pub mod registry;
pub mod traits;

pub use config::{AccountConfig, AgentConfig, ChannelConfig, Config, PluginConfig, SessionConfig};
pub use context::{
    ChannelCapabilities, ChannelMeta, ChatType, CommandContext, CommandReply, Envelope,
    InboundContext, OutboundMedia, OutboundText, ReplyPayload, Route, RouteRequest, SendResult,
    ToolResult,
};
pub use registry::PluginRegistry;
pub use traits::{AgentTool, ChannelPlugin, HostRuntime, PluginRegistrar, ReplySink, SlashCommand};
