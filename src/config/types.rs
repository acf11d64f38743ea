//! Configuration type definitions.

use std::time::Duration;

use serde::Deserialize;

use crate::common::types::EndpointId;

/// Default per-call timeout for endpoint apply-operations.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default capacity of the shared update queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    pub endpoints: Vec<EndpointConfig>,
}

/// Bridge-wide settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Path to the SQLite database. `None` keeps correlations in memory only.
    pub database: Option<String>,
    /// Timeout applied to every apply-call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Capacity of the update queue shared by all endpoint listeners.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            database: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// One configured platform connection, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EndpointConfig {
    Telegram(TelegramConfig),
    Mastodon(MastodonConfig),
}

impl EndpointConfig {
    pub fn id(&self) -> EndpointId {
        match self {
            EndpointConfig::Telegram(c) => EndpointId(c.id),
            EndpointConfig::Mastodon(c) => EndpointId(c.id),
        }
    }

    /// Platform name as written in the config file.
    pub fn platform_name(&self) -> &'static str {
        match self {
            EndpointConfig::Telegram(_) => "telegram",
            EndpointConfig::Mastodon(_) => "mastodon",
        }
    }
}

/// Telegram channel reached through a bot.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub id: u32,
    pub bot_token: String,
    /// Numeric chat id of the channel, usually `-100...`.
    pub channel_id: i64,
    /// Bot API base URL, overridable for self-hosted API servers.
    #[serde(default = "default_telegram_api")]
    pub api_url: String,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

/// Mastodon account the bridge posts as.
#[derive(Debug, Clone, Deserialize)]
pub struct MastodonConfig {
    pub id: u32,
    /// Instance base URL, e.g. `https://mastodon.social`.
    pub instance: String,
    pub access_token: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}
