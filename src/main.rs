// ABOUTME: Standalone entry point: runs the Misskey channel plugin outside an agent host.
// ABOUTME: Subcommands start gateways, call agent tools, run slash commands, and list accounts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mkclaw::config::Config;
use mkclaw::local_host::LocalHost;
use mkclaw::registry::PluginRegistry;
use mkclaw_core::CommandContext;
use serde_json::Value;
use std::io;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mkclaw")]
#[command(version, about = "Misskey channel plugin bridged through the `what` CLI", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start gateways for configured accounts and deliver notes until ctrl-c
    Run {
        /// Only start this account
        #[arg(short, long)]
        account: Option<String>,
    },
    /// Call an agent tool once and print its result
    Tool {
        /// Tool name, e.g. misskey_timeline
        name: String,
        /// Parameters as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,
    },
    /// Run a slash command and print its reply
    Command {
        /// Command name, with or without the leading slash
        name: String,
        /// Command arguments
        args: Vec<String>,
        /// Sender id checked against the admin list
        #[arg(long)]
        sender: Option<String>,
    },
    /// List configured account ids
    Accounts,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    // stdout is reserved for command output
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }

    let config = Config::load()?;
    tracing::info!(
        binary = %config.plugin.cli_binary,
        mention_only = config.plugin.mention_only,
        admins = config.plugin.admins.len(),
        session_store = %config.session.store_path().display(),
        "Configuration loaded"
    );

    let mut registry = PluginRegistry::new(config.to_host_value());
    let channel = mkclaw::register(&mut registry)?;

    match cli.command {
        Command::Run { account } => {
            let host = Arc::new(LocalHost::new(config.agent.clone()));
            let started = registry.start_all(host, account.as_deref()).await;
            if started == 0 {
                anyhow::bail!("no accounts started; check the log for errors");
            }
            tracing::info!(started, "mkclaw running, press ctrl-c to stop");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for ctrl-c")?;
            tracing::info!("Shutting down");
            registry.shutdown_all().await;
        }
        Command::Tool { name, params } => {
            let params: Value =
                serde_json::from_str(&params).context("--params must be a JSON object")?;
            let result = registry.call_tool(&name, params).await;
            println!("{}", result.content);
            if result.is_error {
                std::process::exit(1);
            }
        }
        Command::Command { name, args, sender } => {
            let ctx = CommandContext::new(sender.as_deref(), args.join(" "));
            let reply = registry.run_command(&name, ctx).await;
            println!("{}", reply.text);
        }
        Command::Accounts => {
            for account_id in channel.config().list_account_ids() {
                let account = channel.config().resolve_account(Some(&account_id));
                println!(
                    "{}\t{}\t{}",
                    account_id,
                    if account.enabled { "enabled" } else { "disabled" },
                    channel.config().binary_for(&account)
                );
            }
        }
    }

    Ok(())
}
