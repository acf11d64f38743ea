//! Platform endpoints.
//!
//! An endpoint is one configured connection to one platform. It turns native
//! platform events into canonical [`Update`]s and applies new messages and
//! edits on behalf of the bridge. The bridge only ever talks to endpoints
//! through the [`Endpoint`] trait.

pub mod markup;
pub mod mastodon;
pub mod telegram;

#[cfg(test)]
pub mod mock;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::common::error::{ConfigError, EndpointResult};
use crate::common::types::{Content, EndpointId, PlatformMessageId, Revision, Update};
use crate::config::types::EndpointConfig;

pub use mastodon::MastodonEndpoint;
pub use telegram::TelegramEndpoint;

/// Platform family of an endpoint. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Telegram,
    Mastodon,
    #[cfg(test)]
    Mock,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Telegram => "telegram",
            Platform::Mastodon => "mastodon",
            #[cfg(test)]
            Platform::Mock => "mock",
        };
        f.write_str(name)
    }
}

/// Capabilities every platform adapter provides.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Identifier assigned in configuration.
    fn id(&self) -> EndpointId;

    fn platform(&self) -> Platform;

    /// Validate credentials and open the platform client.
    ///
    /// Must be called once before any other async method. Does not start
    /// listening for events.
    async fn initialize(&mut self, config: &EndpointConfig) -> Result<(), ConfigError>;

    /// Forward platform events to `updates` until `shutdown` flips to `true`.
    ///
    /// Events that have no canonical representation are dropped. Returns an
    /// error only when the platform transport fails for good.
    async fn listen_updates(
        &self,
        shutdown: watch::Receiver<bool>,
        updates: mpsc::Sender<Update>,
    ) -> EndpointResult<()>;

    /// Post a new message; returns its platform id and creation revision.
    async fn apply_new(&self, content: &Content) -> EndpointResult<(PlatformMessageId, Revision)>;

    /// Replace the body of an existing message; returns the edit revision.
    async fn apply_edit(&self, id: &PlatformMessageId, content: &Content)
        -> EndpointResult<Revision>;

    /// Deletion is not supported by any endpoint yet.
    async fn apply_delete(&self, id: &PlatformMessageId) -> EndpointResult<()>;
}

/// Construct the adapter matching an endpoint configuration.
///
/// The returned endpoint still has to be initialized.
pub fn build(config: &EndpointConfig) -> Box<dyn Endpoint> {
    match config {
        EndpointConfig::Telegram(c) => Box::new(TelegramEndpoint::new(EndpointId(c.id))),
        EndpointConfig::Mastodon(c) => Box::new(MastodonEndpoint::new(EndpointId(c.id))),
    }
}

/// Queue an update, giving up if the bridge shuts down or stops consuming.
///
/// Blocks while the queue is full. Returns `false` when the listener should stop.
pub(crate) async fn emit(
    updates: &mpsc::Sender<Update>,
    shutdown: &mut watch::Receiver<bool>,
    update: Update,
) -> bool {
    tokio::select! {
        sent = updates.send(update) => sent.is_ok(),
        _ = wait_for_shutdown(shutdown) => false,
    }
}

/// Resolve once the shutdown flag is set or its sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Error for a config variant handed to the wrong adapter.
pub(crate) fn wrong_platform(expected: Platform, config: &EndpointConfig) -> ConfigError {
    ConfigError::InvalidValue {
        field: format!("endpoints[id={}].type", config.id()),
        message: format!(
            "{} endpoint cannot be initialized from a {} configuration",
            expected,
            config.platform_name()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::MessageKey;
    use crate::config::types::TelegramConfig;

    fn sample_update() -> Update {
        Update::new_message(
            MessageKey::new(EndpointId(1), "a1"),
            Content::text("hello"),
            Revision::from_unix_seconds(100).unwrap(),
        )
    }

    #[test]
    fn test_build_picks_adapter_by_type() {
        let config = EndpointConfig::Telegram(TelegramConfig {
            id: 7,
            bot_token: "1:x".to_string(),
            channel_id: -1,
            api_url: "https://api.telegram.org".to_string(),
        });
        let endpoint = build(&config);
        assert_eq!(endpoint.id(), EndpointId(7));
        assert_eq!(endpoint.platform(), Platform::Telegram);
    }

    #[tokio::test]
    async fn test_emit_delivers_update() {
        let (tx, mut rx) = mpsc::channel(1);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        assert!(emit(&tx, &mut shutdown_rx, sample_update()).await);
        assert_eq!(rx.recv().await, Some(sample_update()));
    }

    #[tokio::test]
    async fn test_emit_on_full_queue_gives_up_on_shutdown() {
        let (tx, _rx) = mpsc::channel(1);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        tx.send(sample_update()).await.unwrap();

        let blocked = tokio::spawn(async move { emit(&tx, &mut shutdown_rx, sample_update()).await });
        tokio::task::yield_now().await;
        shutdown_tx.send(true).unwrap();

        assert!(!blocked.await.unwrap());
    }

    #[tokio::test]
    async fn test_emit_stops_when_queue_closed() {
        let (tx, rx) = mpsc::channel(1);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        drop(rx);

        assert!(!emit(&tx, &mut shutdown_rx, sample_update()).await);
    }
}
