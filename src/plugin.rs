// ABOUTME: Plugin entry point: reads the host config and registers the channel, tools and commands.
// ABOUTME: Everything registered shares one config snapshot taken at registration time.

use anyhow::{Context, Result};
use mkclaw_core::config::Config;
use mkclaw_core::PluginRegistrar;
use std::sync::Arc;

use crate::channel::MisskeyChannel;
use crate::commands::{PostCommand, TimelineCommand};
use crate::tools::all_tools;

/// Register the Misskey channel with a host. Returns the channel so callers
/// can reach its bridges directly.
pub fn register(registrar: &mut dyn PluginRegistrar) -> Result<Arc<MisskeyChannel>> {
    let config = Config::from_host_value(registrar.config())
        .context("Failed to read Misskey plugin configuration")?;

    let channel = Arc::new(MisskeyChannel::new(config));
    registrar.register_channel(channel.clone());

    let cli = channel.default_cli().clone();
    for tool in all_tools(&cli) {
        registrar.register_tool(tool);
    }

    let config = Arc::clone(channel.config());
    registrar.register_command(Arc::new(PostCommand::new(cli.clone(), Arc::clone(&config))));
    registrar.register_command(Arc::new(TimelineCommand::new(cli.clone(), config)));

    tracing::info!(
        binary = %cli.binary(),
        available = cli.is_available(),
        accounts = ?channel.config().list_account_ids(),
        "Misskey plugin registered"
    );
    Ok(channel)
}
