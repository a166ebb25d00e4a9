// ABOUTME: Configuration parsing from TOML or the host config object, with environment overrides
// ABOUTME: Plugin settings, per-account channel settings, session store, and the local agent program
use crate::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Key of this plugin under `plugins.entries` and `channels` in the host config
pub const CHANNEL_ID: &str = "misskey";
pub const DEFAULT_ACCOUNT_ID: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub plugin: PluginConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Plugin-wide settings (`plugins.entries.misskey.config` in the host object)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Path or name of the `what` binary
    #[serde(default = "default_cli_binary", alias = "cliBinary")]
    pub cli_binary: String,
    /// Only deliver mentions and direct notes
    #[serde(default, alias = "mentionOnly")]
    pub mention_only: bool,
    /// Sender ids allowed to run auth-requiring commands; empty allows everyone
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default = "default_command_timeout_secs", alias = "commandTimeoutSecs")]
    pub command_timeout_secs: u64,
    /// Respawn the stream process when it exits
    #[serde(default = "default_true")]
    pub reconnect: bool,
    /// Give up reconnecting after this many attempts (0 = never)
    #[serde(default, alias = "reconnectMaxAttempts")]
    pub reconnect_max_attempts: u32,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            cli_binary: default_cli_binary(),
            mention_only: false,
            admins: Vec::new(),
            command_timeout_secs: default_command_timeout_secs(),
            reconnect: true,
            reconnect_max_attempts: 0,
        }
    }
}

/// Channel settings (`channels.misskey` in the host object)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default, deserialize_with = "deserialize_accounts")]
    pub accounts: BTreeMap<String, AccountConfig>,
}

/// One configured account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Filled from the map key
    #[serde(skip)]
    pub account_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Per-account binary override
    #[serde(default, alias = "cliBinary", skip_serializing_if = "Option::is_none")]
    pub cli_binary: Option<String>,
}

impl AccountConfig {
    /// An account known only by its id
    pub fn bare(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            enabled: true,
            name: None,
            cli_binary: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
}

impl SessionConfig {
    pub fn store_path(&self) -> PathBuf {
        match &self.store {
            Some(store) => PathBuf::from(paths::expand_tilde(store)),
            None => paths::session_dir(),
        }
    }
}

/// External agent program used by the standalone host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

fn default_cli_binary() -> String {
    "what".to_string()
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_agent_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Accounts may be given as settings tables or as bare `true` flags
fn deserialize_accounts<'de, D>(deserializer: D) -> Result<BTreeMap<String, AccountConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AccountEntry {
        Settings(AccountConfig),
        Flag(bool),
    }

    let raw = BTreeMap::<String, AccountEntry>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(id, entry)| {
            let mut account = match entry {
                AccountEntry::Settings(account) => account,
                AccountEntry::Flag(enabled) => AccountConfig {
                    enabled,
                    ..AccountConfig::bare(id.clone())
                },
            };
            account.account_id = id.clone();
            (id, account)
        })
        .collect())
}

fn parse_bool_env(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("{} must be a boolean, got: {}", name, other),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Find the config file, checking in order:
    /// 1. MKCLAW_CONFIG_PATH env var (if set and present)
    /// 2. ./config.toml
    /// 3. ~/.config/mkclaw/config.toml
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("MKCLAW_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration from the first config file found, then apply
    /// environment overrides and validate. No file means defaults.
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(config_path) => {
                tracing::info!(path = %config_path.display(), "Loading configuration from file");
                let content = std::fs::read_to_string(&config_path)
                    .with_context(|| format!("Failed to read {}", config_path.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Failed to parse {}", config_path.display()))?
            }
            None => {
                tracing::info!("No config file found, using environment variables and defaults");
                Config::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str::<Config>(content)?)
    }

    /// Read the plugin's sections out of a host config object:
    /// `plugins.entries.misskey.config`, `channels.misskey` and `session`.
    pub fn from_host_value(cfg: &Value) -> Result<Self> {
        let plugin = match cfg.pointer(&format!("/plugins/entries/{}/config", CHANNEL_ID)) {
            Some(v) if !v.is_null() => serde_json::from_value(v.clone())
                .context("Invalid plugins.entries.misskey.config")?,
            _ => PluginConfig::default(),
        };
        let channel = match cfg.pointer(&format!("/channels/{}", CHANNEL_ID)) {
            Some(v) if !v.is_null() => {
                serde_json::from_value(v.clone()).context("Invalid channels.misskey")?
            }
            _ => ChannelConfig::default(),
        };
        let session = match cfg.get("session") {
            Some(v) if !v.is_null() => {
                serde_json::from_value(v.clone()).context("Invalid session config")?
            }
            _ => SessionConfig::default(),
        };

        let mut config = Config {
            plugin,
            channel,
            session,
            agent: AgentConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// The host config object this configuration corresponds to
    pub fn to_host_value(&self) -> Value {
        let mut plugins = json!({ "entries": {} });
        plugins["entries"][CHANNEL_ID] = json!({ "config": self.plugin });
        let mut channels = json!({});
        channels[CHANNEL_ID] = json!(self.channel);
        json!({
            "plugins": plugins,
            "channels": channels,
            "session": self.session,
        })
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("MISSKEY_CLI_BINARY") {
            self.plugin.cli_binary = val;
        }
        if let Ok(val) = std::env::var("MKCLAW_MENTION_ONLY") {
            self.plugin.mention_only = parse_bool_env("MKCLAW_MENTION_ONLY", &val)?;
        }
        if let Ok(val) = std::env::var("MKCLAW_ADMINS") {
            self.plugin.admins = split_list(&val);
        }
        if let Ok(val) = std::env::var("MKCLAW_COMMAND_TIMEOUT_SECS") {
            self.plugin.command_timeout_secs = val.parse().with_context(|| {
                format!("MKCLAW_COMMAND_TIMEOUT_SECS must be a number of seconds, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("MKCLAW_SESSION_STORE") {
            self.session.store = Some(val);
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.plugin.cli_binary.trim().is_empty() {
            anyhow::bail!(
                "plugin.cli_binary must not be empty (set in config.toml or MISSKEY_CLI_BINARY env var)"
            );
        }
        if self.plugin.command_timeout_secs == 0 {
            anyhow::bail!("plugin.command_timeout_secs must be greater than zero");
        }
        if self.agent.timeout_secs == 0 {
            anyhow::bail!("agent.timeout_secs must be greater than zero");
        }

        self.plugin.admins = self
            .plugin
            .admins
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        for (id, account) in self.channel.accounts.iter_mut() {
            account.account_id = id.clone();
            if account
                .cli_binary
                .as_deref()
                .is_some_and(|b| b.trim().is_empty())
            {
                account.cli_binary = None;
            }
        }
        Ok(())
    }

    /// Configured account ids, or `["default"]` when none are configured
    pub fn list_account_ids(&self) -> Vec<String> {
        if self.channel.accounts.is_empty() {
            return vec![DEFAULT_ACCOUNT_ID.to_string()];
        }
        self.channel.accounts.keys().cloned().collect()
    }

    /// The named account (default `default`); unknown ids resolve to a bare account
    pub fn resolve_account(&self, account_id: Option<&str>) -> AccountConfig {
        let id = account_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(DEFAULT_ACCOUNT_ID);
        match self.channel.accounts.get(id) {
            Some(account) => AccountConfig {
                account_id: id.to_string(),
                ..account.clone()
            },
            None => AccountConfig::bare(id),
        }
    }

    /// Binary an account's bridge should run
    pub fn binary_for(&self, account: &AccountConfig) -> String {
        account
            .cli_binary
            .clone()
            .unwrap_or_else(|| self.plugin.cli_binary.clone())
    }

    /// Whether `sender` may run auth-requiring commands
    pub fn is_admin(&self, sender: Option<&str>) -> bool {
        if self.plugin.admins.is_empty() {
            return true;
        }
        sender.is_some_and(|s| self.plugin.admins.iter().any(|a| a == s))
    }
}
