//! Error types for the application.

use thiserror::Error;

use crate::common::types::{BridgeMessageId, EndpointId, MessageKey};

/// Top-level application error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Correlation store error: {0}")]
    Store(#[from] StoreError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Failures of a single endpoint call or connection.
///
/// Everything except [`EndpointError::Unsupported`] is transient from the
/// bridge's point of view: logged, skipped for that endpoint, never retried.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid platform message id '{id}'")]
    InvalidMessageId { id: String },

    #[error("Platform response carried no usable revision")]
    MissingRevision,

    #[error("Transport failed: {message}")]
    Transport { message: String },

    #[error("Operation not supported by this endpoint")]
    Unsupported,
}

/// Correlation store failures. All of them are fatal to the dispatch loop.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message {0} is not tracked")]
    NotFound(MessageKey),

    #[error("Message {0} is already tracked")]
    AlreadyExists(MessageKey),

    #[error("Bridge message {bridge_id} already has a copy on endpoint {endpoint}")]
    DuplicateEndpoint {
        bridge_id: BridgeMessageId,
        endpoint: EndpointId,
    },

    #[error("Bridge message {0} was never allocated")]
    UnknownBridgeMessage(BridgeMessageId),

    #[error("Invalid bridge message id 0 for {0}")]
    InvalidBridgeId(MessageKey),

    #[error("Stored data is inconsistent: {message}")]
    Corrupt { message: String },

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Fatal errors that terminate the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Correlation store failure: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias using AppError.
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for endpoint operations.
pub type EndpointResult<T> = std::result::Result<T, EndpointError>;

/// Result type alias for correlation store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
