// ABOUTME: Registry that collects what a plugin registers and drives channel lifecycles.
// ABOUTME: Handles lookup of channels, tools and commands, account startup, and coordinated shutdown.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::{CommandContext, CommandReply, ToolResult};
use crate::traits::{AgentTool, ChannelPlugin, HostRuntime, PluginRegistrar, SlashCommand};

/// Central registry for registered channels, tools and commands.
///
/// Each kind is keyed by its id/name; registering the same key again
/// replaces the earlier entry.
pub struct PluginRegistry {
    config: Value,
    channels: HashMap<String, Arc<dyn ChannelPlugin>>,
    tools: HashMap<String, Arc<dyn AgentTool>>,
    commands: HashMap<String, Arc<dyn SlashCommand>>,
}

impl PluginRegistry {
    pub fn new(config: Value) -> Self {
        Self {
            config,
            channels: HashMap::new(),
            tools: HashMap::new(),
            commands: HashMap::new(),
        }
    }

    /// Look up a channel by id or alias
    pub fn channel(&self, id: &str) -> Option<Arc<dyn ChannelPlugin>> {
        if let Some(channel) = self.channels.get(id) {
            return Some(Arc::clone(channel));
        }
        self.channels
            .values()
            .find(|c| c.meta().aliases.iter().any(|a| a == id))
            .cloned()
    }

    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn command(&self, name: &str) -> Option<Arc<dyn SlashCommand>> {
        self.commands.get(name.trim_start_matches('/')).cloned()
    }

    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Call a tool by name; unknown names produce an error result
    pub async fn call_tool(&self, name: &str, params: Value) -> ToolResult {
        match self.tool(name) {
            Some(tool) => tool.call(params).await,
            None => ToolResult::error(format!("unknown tool '{}'", name)),
        }
    }

    /// Run a command by name; unknown names produce an explanatory reply
    pub async fn run_command(&self, name: &str, ctx: CommandContext) -> CommandReply {
        match self.command(name) {
            Some(command) => {
                if !command.accepts_args() && !ctx.args.trim().is_empty() {
                    tracing::debug!(command = %name, "ignoring arguments to command that takes none");
                }
                command.run(ctx).await
            }
            None => CommandReply::text(format!("Unknown command: /{}", name.trim_start_matches('/'))),
        }
    }

    /// Start every configured account of every channel. `only` restricts
    /// startup to one account id. Returns how many accounts started.
    pub async fn start_all(&self, host: Arc<dyn HostRuntime>, only: Option<&str>) -> usize {
        let mut started = 0;
        for (channel_id, channel) in &self.channels {
            for account_id in channel.list_account_ids(&self.config) {
                if only.is_some_and(|o| o != account_id) {
                    continue;
                }
                let account = channel.resolve_account(&self.config, Some(&account_id));
                if !account.enabled {
                    tracing::info!(channel = %channel_id, account_id = %account_id, "account disabled, skipping");
                    continue;
                }
                match channel.start_account(&account_id, Arc::clone(&host)).await {
                    Ok(()) => started += 1,
                    Err(e) => tracing::error!(
                        channel = %channel_id,
                        account_id = %account_id,
                        error = %e,
                        "failed to start account"
                    ),
                }
            }
        }
        started
    }

    /// Stop every running account of every channel
    pub async fn shutdown_all(&self) {
        for (channel_id, channel) in &self.channels {
            for account_id in channel.running_accounts() {
                if let Err(e) = channel.stop_account(&account_id).await {
                    tracing::error!(
                        channel = %channel_id,
                        account_id = %account_id,
                        error = %e,
                        "account shutdown failed"
                    );
                }
            }
        }
    }
}

impl PluginRegistrar for PluginRegistry {
    fn config(&self) -> &Value {
        &self.config
    }

    fn register_channel(&mut self, channel: Arc<dyn ChannelPlugin>) {
        let id = channel.meta().id.clone();
        tracing::debug!(channel = %id, "channel registered");
        self.channels.insert(id, channel);
    }

    fn register_tool(&mut self, tool: Arc<dyn AgentTool>) {
        let name = tool.name().to_string();
        tracing::debug!(tool = %name, "tool registered");
        self.tools.insert(name, tool);
    }

    fn register_command(&mut self, command: Arc<dyn SlashCommand>) {
        let name = command.name().to_string();
        tracing::debug!(command = %name, "command registered");
        self.commands.insert(name, command);
    }
}
