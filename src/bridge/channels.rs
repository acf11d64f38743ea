//! Bridge channel management.
//!
//! Provides the channel structures wiring endpoint listeners to the dispatch
//! loop: one shared bounded update queue and one shutdown signal.

use tokio::sync::{mpsc, watch};

use crate::common::types::Update;

/// Channels handed to the endpoint listener tasks.
pub struct ListenerChannels {
    /// Sender side of the shared update queue, cloned once per listener.
    pub updates_tx: mpsc::Sender<Update>,
    /// Receiver for shutdown signal (listeners stop when it flips).
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Channels used by the single dispatch task.
pub struct DispatchChannels {
    /// Receiver side of the shared update queue.
    pub updates_rx: mpsc::Receiver<Update>,
    /// Receiver for shutdown signal.
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Control channels for shutdown coordination.
pub struct ControlChannels {
    /// Sender to trigger shutdown.
    pub shutdown_tx: watch::Sender<bool>,
}

/// Bundle of all channels created for the bridge.
pub struct ChannelBundle {
    pub listeners: ListenerChannels,
    pub dispatch: DispatchChannels,
    pub control: ControlChannels,
}

impl ChannelBundle {
    /// Create the bridge channels with an update queue of `capacity` entries.
    ///
    /// A full queue blocks listeners until the dispatch loop catches up.
    pub fn new(capacity: usize) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            listeners: ListenerChannels {
                updates_tx,
                shutdown_rx: shutdown_rx.clone(),
            },
            dispatch: DispatchChannels {
                updates_rx,
                shutdown_rx,
            },
            control: ControlChannels { shutdown_tx },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Content, EndpointId, MessageKey, Revision};

    #[tokio::test]
    async fn test_queue_is_bounded() {
        let mut channels = ChannelBundle::new(1);
        let update = Update::new_message(
            MessageKey::new(EndpointId(1), "a1"),
            Content::text("hello"),
            Revision::from_unix_seconds(100).unwrap(),
        );

        channels.listeners.updates_tx.try_send(update.clone()).unwrap();
        assert!(channels.listeners.updates_tx.try_send(update.clone()).is_err());

        assert_eq!(channels.dispatch.updates_rx.recv().await, Some(update));
    }

    #[test]
    fn test_shutdown_reaches_both_sides() {
        let channels = ChannelBundle::new(4);
        channels.control.shutdown_tx.send(true).unwrap();

        assert!(*channels.listeners.shutdown_rx.borrow());
        assert!(*channels.dispatch.shutdown_rx.borrow());
    }
}
