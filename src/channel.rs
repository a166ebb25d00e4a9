// ABOUTME: The Misskey ChannelPlugin: account lookup, per-account gateways, and outbound sends.
// ABOUTME: Each account gets its own bridge (and stream process); tools and commands share the plugin bridge.

use anyhow::Result;
use async_trait::async_trait;
use mkclaw_bridge::{BridgeConfig, MisskeyCli, ReconnectPolicy};
use mkclaw_core::config::{Config, CHANNEL_ID, DEFAULT_ACCOUNT_ID};
use mkclaw_core::{
    AccountConfig, ChannelCapabilities, ChannelMeta, ChannelPlugin, ChatType, HostRuntime,
    OutboundMedia, OutboundText, SendResult,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::gateway::{Gateway, GatewayOptions, GatewayState};
use crate::inbound::{InboundPipeline, CHANNEL_LABEL};
use crate::outbound;

pub fn channel_meta() -> ChannelMeta {
    ChannelMeta {
        id: CHANNEL_ID.to_string(),
        label: CHANNEL_LABEL.to_string(),
        selection_label: "Misskey (Streaming API)".to_string(),
        docs_path: "/channels/misskey".to_string(),
        blurb: "Connect to a Misskey instance via Streaming WebSocket.".to_string(),
        aliases: vec!["mk".to_string()],
    }
}

pub struct MisskeyChannel {
    config: Arc<Config>,
    meta: ChannelMeta,
    /// Bridge for tools, commands and sends without an account
    default_cli: MisskeyCli,
    bridges: Mutex<HashMap<String, MisskeyCli>>,
    gateways: Mutex<HashMap<String, Arc<Gateway>>>,
}

impl MisskeyChannel {
    pub fn new(config: Config) -> Self {
        let default_cli = MisskeyCli::new(BridgeConfig {
            binary: config.plugin.cli_binary.clone(),
            command_timeout_secs: config.plugin.command_timeout_secs,
        });
        Self {
            config: Arc::new(config),
            meta: channel_meta(),
            default_cli,
            bridges: Mutex::new(HashMap::new()),
            gateways: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn default_cli(&self) -> &MisskeyCli {
        &self.default_cli
    }

    /// The bridge for an account, created on first use
    pub fn bridge(&self, account: &AccountConfig) -> MisskeyCli {
        let mut bridges = lock(&self.bridges);
        bridges
            .entry(account.account_id.clone())
            .or_insert_with(|| {
                MisskeyCli::new(BridgeConfig {
                    binary: self.config.binary_for(account),
                    command_timeout_secs: self.config.plugin.command_timeout_secs,
                })
            })
            .clone()
    }

    /// Bridge for an outbound request's account, or the plugin bridge
    fn bridge_for_send(&self, account_id: Option<&str>) -> (String, MisskeyCli) {
        match account_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => {
                let account = self.config.resolve_account(Some(id));
                (account.account_id.clone(), self.bridge(&account))
            }
            None => (DEFAULT_ACCOUNT_ID.to_string(), self.default_cli.clone()),
        }
    }

    pub fn gateway(&self, account_id: &str) -> Option<Arc<Gateway>> {
        lock(&self.gateways).get(account_id).cloned()
    }

    fn gateway_options(&self) -> GatewayOptions {
        let plugin = &self.config.plugin;
        GatewayOptions {
            mention_only: plugin.mention_only,
            reconnect: plugin.reconnect.then(|| ReconnectPolicy {
                max_attempts: plugin.reconnect_max_attempts,
                ..ReconnectPolicy::default()
            }),
        }
    }

    /// Config from the host object, or the plugin's own when it doesn't parse
    fn config_from(&self, cfg: &Value) -> Config {
        match Config::from_host_value(cfg) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "invalid host config, using plugin config");
                (*self.config).clone()
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ChannelPlugin for MisskeyChannel {
    fn meta(&self) -> &ChannelMeta {
        &self.meta
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            chat_types: vec![ChatType::Direct, ChatType::Group],
        }
    }

    fn list_account_ids(&self, cfg: &Value) -> Vec<String> {
        self.config_from(cfg).list_account_ids()
    }

    fn resolve_account(&self, cfg: &Value, account_id: Option<&str>) -> AccountConfig {
        self.config_from(cfg).resolve_account(account_id)
    }

    async fn start_account(&self, account_id: &str, host: Arc<dyn HostRuntime>) -> Result<()> {
        let account = self.config.resolve_account(Some(account_id));
        if !account.enabled {
            anyhow::bail!("account '{}' is disabled", account.account_id);
        }

        let previous = {
            let mut gateways = lock(&self.gateways);
            match gateways.get(&account.account_id) {
                Some(existing) if existing.state() != GatewayState::Stopped => {
                    anyhow::bail!(
                        "account '{}' is already {}",
                        account.account_id,
                        existing.state()
                    );
                }
                Some(_) => gateways.remove(&account.account_id),
                None => None,
            }
        };
        // a gateway that stopped on its own still owns a finished consumer task
        if let Some(previous) = previous {
            previous.stop().await;
        }

        let cli = self.bridge(&account);
        let pipeline = InboundPipeline::new(
            account.account_id.clone(),
            cli.clone(),
            host,
            self.config.session.store_path(),
        );
        let gateway = Arc::new(Gateway::new(
            account.account_id.clone(),
            cli,
            self.gateway_options(),
        ));
        gateway.start(pipeline)?;

        tracing::info!(
            account_id = %account.account_id,
            name = ?account.name,
            mention_only = self.config.plugin.mention_only,
            "account started"
        );
        lock(&self.gateways).insert(account.account_id.clone(), gateway);
        Ok(())
    }

    async fn stop_account(&self, account_id: &str) -> Result<()> {
        let gateway = lock(&self.gateways).remove(account_id);
        match gateway {
            Some(gateway) => {
                gateway.stop().await;
                tracing::info!(account_id = %account_id, "account stopped");
            }
            None => tracing::debug!(account_id = %account_id, "account was not running"),
        }
        Ok(())
    }

    fn running_accounts(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.gateways)
            .iter()
            .filter(|(_, gateway)| gateway.state() != GatewayState::Stopped)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    async fn send_text(&self, request: OutboundText) -> SendResult {
        let (account_id, cli) = self.bridge_for_send(request.account_id.as_deref());
        outbound::send_text(&cli, &account_id, &request).await
    }

    async fn send_media(&self, request: OutboundMedia) -> SendResult {
        let (account_id, cli) = self.bridge_for_send(request.account_id.as_deref());
        outbound::send_media(&cli, &account_id, &request).await
    }
}
