//! Configuration file parsing (HOCON format).

use std::path::Path;

use crate::common::error::ConfigError;
use crate::config::types::Config;
use hocon::HoconLoader;

/// Load configuration from a HOCON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    HoconLoader::new()
        .load_file(path)
        .map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

/// Load configuration from a HOCON string.
#[cfg(test)]
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    HoconLoader::new()
        .load_str(content)
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{EndpointConfig, DEFAULT_QUEUE_CAPACITY};

    const SAMPLE: &str = r#"
        bridge {
            database = "bridge.db"
            request_timeout_secs = 5
        }
        endpoints = [
            {
                type = "mastodon"
                id = 1
                instance = "https://example.social"
                access_token = "token"
            }
            {
                type = "telegram"
                id = 2
                bot_token = "123456:secret"
                channel_id = -1001234567890
            }
        ]
    "#;

    #[test]
    fn test_parse_sample_config() {
        let config = load_config_str(SAMPLE).unwrap();

        assert_eq!(config.bridge.database.as_deref(), Some("bridge.db"));
        assert_eq!(config.bridge.request_timeout_secs, 5);
        assert_eq!(config.bridge.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.endpoints.len(), 2);

        match &config.endpoints[0] {
            EndpointConfig::Mastodon(m) => {
                assert_eq!(m.id, 1);
                assert_eq!(m.instance, "https://example.social");
                assert!(m.client_id.is_none());
            }
            other => panic!("expected mastodon endpoint, got {:?}", other),
        }
        match &config.endpoints[1] {
            EndpointConfig::Telegram(t) => {
                assert_eq!(t.id, 2);
                assert_eq!(t.channel_id, -1001234567890);
                assert_eq!(t.api_url, "https://api.telegram.org");
            }
            other => panic!("expected telegram endpoint, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_platform_fails_loading() {
        let content = r#"
            endpoints = [ { type = "myspace", id = 1, token = "x" } ]
        "#;
        let err = load_config_str(content).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
