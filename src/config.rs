use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chat::DeliveryConfirmation;
use crate::network::BackoffPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";
pub const DISCOVERY_SERVERS_ENV: &str = "COUNSEL_CHAT_DISCOVERY_SERVERS";

const DEFAULT_LISTEN_ADDR: &str = "/ip4/0.0.0.0/tcp/0";
const DEFAULT_SECRETS_PATH: &str = "data/secrets.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Rendezvous multiaddrs dialled during negotiation only.
    pub discovery_servers: Vec<String>,
    pub listen_addr: String,
    pub negotiation_timeout_ms: u64,
    pub channel_capacity: usize,
    pub delivery: DeliveryConfirmation,
    pub reconnect: ReconnectConfig,
    pub secrets_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discovery_servers: Vec::new(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            negotiation_timeout_ms: 10_000,
            channel_capacity: 100,
            delivery: DeliveryConfirmation::default(),
            reconnect: ReconnectConfig::default(),
            secrets_path: DEFAULT_SECRETS_PATH.to_string(),
        }
    }
}

impl AppConfig {
    /// Channel settings for the conversation identified by `label`.
    pub fn channel_config(&self, label: &str) -> ChannelConfig {
        ChannelConfig {
            label: label.to_string(),
            discovery_servers: self.discovery_servers.clone(),
            listen_addr: self.listen_addr.clone(),
            negotiation_timeout: Duration::from_millis(self.negotiation_timeout_ms),
            capacity: self.channel_capacity.max(1),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(raw) = env::var(DISCOVERY_SERVERS_ENV) {
            let servers = parse_server_list(&raw);
            log::info!(
                "{DISCOVERY_SERVERS_ENV} overrides discovery servers ({} entries)",
                servers.len()
            );
            self.discovery_servers = servers;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: Option<u32>,
    /// Outgoing payloads kept while disconnected; the oldest are dropped first.
    pub replay_limit: usize,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            max_attempts: Some(10),
            replay_limit: 256,
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.initial_delay_ms),
            max: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
            replay_limit: self.replay_limit,
        }
    }
}

/// Everything a connector needs to negotiate one conversation's pipe.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Names the data channel; peers with the same label join the same pipe.
    pub label: String,
    pub discovery_servers: Vec<String>,
    pub listen_addr: String,
    pub negotiation_timeout: Duration,
    pub capacity: usize,
}

impl ChannelConfig {
    pub fn new(label: impl Into<String>) -> Self {
        AppConfig::default().channel_config(&label.into())
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    let mut config = match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    };
    config.apply_env_overrides();
    config
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}

fn parse_server_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
