//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `POSTBRIDGE_CONFIG` - Path of the config file
//! - `POSTBRIDGE_DATABASE` - Path of the correlation database
//! - `POSTBRIDGE_REQUEST_TIMEOUT` - Per-call timeout in seconds
//! - `POSTBRIDGE_ENDPOINT_<ID>_TOKEN` - Bot token (Telegram) or access token
//!   (Mastodon) of the endpoint with the given id

use std::env;

use tracing::warn;

use crate::config::types::{Config, EndpointConfig};

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "POSTBRIDGE";

/// Apply environment variable overrides to a config.
///
/// This allows tokens to be provided via environment variables instead of
/// the config file.
pub fn apply_env_overrides(config: Config) -> Config {
    apply_overrides(config, |name| env::var(name).ok())
}

/// Apply overrides from an arbitrary variable source.
fn apply_overrides(mut config: Config, var: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(database) = var(&format!("{}_DATABASE", ENV_PREFIX)) {
        config.bridge.database = Some(database);
    }

    if let Some(timeout) = var(&format!("{}_REQUEST_TIMEOUT", ENV_PREFIX)) {
        match timeout.parse() {
            Ok(secs) => config.bridge.request_timeout_secs = secs,
            Err(_) => warn!(
                "Ignoring {}_REQUEST_TIMEOUT: '{}' is not a number of seconds",
                ENV_PREFIX, timeout
            ),
        }
    }

    for endpoint in &mut config.endpoints {
        let name = format!("{}_ENDPOINT_{}_TOKEN", ENV_PREFIX, endpoint.id());
        if let Some(token) = var(&name) {
            match endpoint {
                EndpointConfig::Telegram(t) => t.bot_token = token,
                EndpointConfig::Mastodon(m) => m.access_token = token,
            }
        }
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `POSTBRIDGE_CONFIG` environment variable, otherwise returns "postbridge.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "postbridge.conf".to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::types::*;

    fn make_test_config() -> Config {
        Config {
            bridge: BridgeConfig::default(),
            endpoints: vec![
                EndpointConfig::Mastodon(MastodonConfig {
                    id: 1,
                    instance: "https://example.social".to_string(),
                    access_token: "original_access".to_string(),
                    client_id: None,
                    client_secret: None,
                }),
                EndpointConfig::Telegram(TelegramConfig {
                    id: 2,
                    bot_token: "original_bot".to_string(),
                    channel_id: -100,
                    api_url: "https://api.telegram.org".to_string(),
                }),
            ],
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(ENV_PREFIX, "POSTBRIDGE");
    }

    #[test]
    fn test_no_vars_leaves_config_unchanged() {
        let result = apply_overrides(make_test_config(), vars(&[]));

        assert!(result.bridge.database.is_none());
        assert_eq!(result.bridge.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        match &result.endpoints[1] {
            EndpointConfig::Telegram(t) => assert_eq!(t.bot_token, "original_bot"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_bridge_overrides() {
        let result = apply_overrides(
            make_test_config(),
            vars(&[
                ("POSTBRIDGE_DATABASE", "/var/lib/postbridge.db"),
                ("POSTBRIDGE_REQUEST_TIMEOUT", "30"),
            ]),
        );

        assert_eq!(
            result.bridge.database.as_deref(),
            Some("/var/lib/postbridge.db")
        );
        assert_eq!(result.bridge.request_timeout_secs, 30);
    }

    #[test]
    fn test_bad_timeout_is_ignored() {
        let result = apply_overrides(
            make_test_config(),
            vars(&[("POSTBRIDGE_REQUEST_TIMEOUT", "soon")]),
        );
        assert_eq!(result.bridge.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_endpoint_token_overrides_by_id() {
        let result = apply_overrides(
            make_test_config(),
            vars(&[
                ("POSTBRIDGE_ENDPOINT_1_TOKEN", "env_access"),
                ("POSTBRIDGE_ENDPOINT_2_TOKEN", "42:env_bot"),
            ]),
        );

        match &result.endpoints[0] {
            EndpointConfig::Mastodon(m) => assert_eq!(m.access_token, "env_access"),
            _ => unreachable!(),
        }
        match &result.endpoints[1] {
            EndpointConfig::Telegram(t) => assert_eq!(t.bot_token, "42:env_bot"),
            _ => unreachable!(),
        }
    }
}
