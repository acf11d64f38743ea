//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use std::collections::HashSet;

use reqwest::Url;

use crate::common::error::ConfigError;
use crate::config::types::{Config, EndpointConfig, MastodonConfig, TelegramConfig};

const PLACEHOLDER_TOKENS: [&str; 2] = ["YOUR_BOT_TOKEN_HERE", "YOUR_ACCESS_TOKEN_HERE"];

/// Upper bound for `bridge.request_timeout_secs` (one hour).
const MAX_REQUEST_TIMEOUT_SECS: u64 = 3600;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Bridge settings
    if let Some(ref database) = config.bridge.database {
        if database.trim().is_empty() {
            errors.push("bridge.database must not be empty when set".to_string());
        }
    }
    if config.bridge.request_timeout_secs == 0 {
        errors.push("bridge.request_timeout_secs must be non-zero".to_string());
    } else if config.bridge.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
        errors.push(format!(
            "bridge.request_timeout_secs must be at most {} (got {})",
            MAX_REQUEST_TIMEOUT_SECS, config.bridge.request_timeout_secs
        ));
    }
    if config.bridge.queue_capacity == 0 {
        errors.push("bridge.queue_capacity must be non-zero".to_string());
    }

    // Endpoints
    if config.endpoints.len() < 2 {
        errors.push(format!(
            "at least two endpoints are needed to bridge anything (got {})",
            config.endpoints.len()
        ));
    }

    let mut seen = HashSet::new();
    for (i, endpoint) in config.endpoints.iter().enumerate() {
        let id = endpoint.id();
        if id.0 == 0 {
            errors.push(format!("endpoints[{}].id must be non-zero", i));
        } else if !seen.insert(id) {
            errors.push(format!("endpoints[{}].id {} is used more than once", i, id));
        }

        match endpoint {
            EndpointConfig::Telegram(t) => validate_telegram(i, t, &mut errors),
            EndpointConfig::Mastodon(m) => validate_mastodon(i, m, &mut errors),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

fn validate_telegram(i: usize, config: &TelegramConfig, errors: &mut Vec<String>) {
    if config.bot_token.is_empty() {
        errors.push(format!("endpoints[{}].bot_token is required", i));
    } else if PLACEHOLDER_TOKENS.contains(&config.bot_token.as_str()) {
        errors.push(format!(
            "endpoints[{}].bot_token has not been configured (still using placeholder)",
            i
        ));
    } else if !is_bot_token(&config.bot_token) {
        errors.push(format!(
            "endpoints[{}].bot_token must look like '<bot id>:<secret>'",
            i
        ));
    }

    if config.channel_id == 0 {
        errors.push(format!("endpoints[{}].channel_id must be non-zero", i));
    }

    if let Err(message) = check_http_url(&config.api_url) {
        errors.push(format!("endpoints[{}].api_url {}", i, message));
    }
}

fn validate_mastodon(i: usize, config: &MastodonConfig, errors: &mut Vec<String>) {
    if let Err(message) = check_http_url(&config.instance) {
        errors.push(format!("endpoints[{}].instance {}", i, message));
    }

    if config.access_token.is_empty() {
        errors.push(format!("endpoints[{}].access_token is required", i));
    } else if PLACEHOLDER_TOKENS.contains(&config.access_token.as_str()) {
        errors.push(format!(
            "endpoints[{}].access_token has not been configured (still using placeholder)",
            i
        ));
    }
}

/// Telegram bot tokens are `<numeric bot id>:<secret>`.
fn is_bot_token(token: &str) -> bool {
    match token.split_once(':') {
        Some((bot_id, secret)) => {
            !bot_id.is_empty() && bot_id.chars().all(|c| c.is_ascii_digit()) && !secret.is_empty()
        }
        None => false,
    }
}

fn check_http_url(raw: &str) -> Result<(), String> {
    match Url::parse(raw) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(()),
        Ok(url) => Err(format!("must use http or https (got '{}')", url.scheme())),
        Err(e) => Err(format!("'{}' is not a valid URL: {}", raw, e)),
    }
}
