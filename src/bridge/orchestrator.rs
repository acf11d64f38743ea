//! Bridge orchestrator that ties the endpoints together.
//!
//! Every inbound update is reconciled against the correlation store and, when
//! accepted, fanned out to every endpoint except the one it came from. The
//! store is what keeps the bridge from looping: a copy posted by the bridge
//! comes back from its platform carrying the revision already recorded for
//! it, and is discarded as an echo.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::common::error::{BridgeError, EndpointError, EndpointResult, StoreError};
use crate::common::types::{BridgeMessageId, Change, Content, EndpointId, MessageKey, Update};
use crate::endpoint::{wait_for_shutdown, Endpoint};
use crate::store::SharedStore;

use super::channels::{DispatchChannels, ListenerChannels};

/// Why an update was dropped without touching any endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// Same revision as recorded: our own copy coming back, or a re-delivery.
    Echo,
    /// Edit or deletion of a message the bridge has never seen.
    Untracked,
}

/// Result of handling one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Discarded(Discard),
    /// Deletions are not bridged.
    Rejected,
    FannedOut {
        bridge_id: BridgeMessageId,
        delivered: usize,
        failed: usize,
    },
}

/// What fan-out should do for an accepted update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Post,
    Edit,
}

/// The main bridge that orchestrates message flow.
pub struct Bridge {
    store: SharedStore,
    /// Endpoints by id; ordered so fan-out is deterministic.
    endpoints: BTreeMap<EndpointId, Arc<dyn Endpoint>>,
    /// Bound on every apply-call.
    request_timeout: Duration,
}

impl Bridge {
    pub fn new(
        store: SharedStore,
        endpoints: Vec<Arc<dyn Endpoint>>,
        request_timeout: Duration,
    ) -> Self {
        let mut by_id = BTreeMap::new();
        for endpoint in endpoints {
            let id = endpoint.id();
            if by_id.insert(id, endpoint).is_some() {
                warn!("Endpoint id {} registered twice, keeping the last one", id);
            }
        }

        Self {
            store,
            endpoints: by_id,
            request_timeout,
        }
    }

    /// Run the bridge until shutdown.
    ///
    /// Spawns one listener task per endpoint and dispatches their updates one
    /// at a time. Returns `Ok` on shutdown or once every listener has stopped,
    /// and an error when the correlation store fails.
    pub async fn run(
        self,
        listeners: ListenerChannels,
        dispatch: DispatchChannels,
    ) -> Result<(), BridgeError> {
        let mut tasks = JoinSet::new();
        for endpoint in self.endpoints.values() {
            let endpoint = Arc::clone(endpoint);
            let updates_tx = listeners.updates_tx.clone();
            let shutdown_rx = listeners.shutdown_rx.clone();
            tasks.spawn(async move {
                let id = endpoint.id();
                info!("Endpoint {} ({}) listening", id, endpoint.platform());
                match endpoint.listen_updates(shutdown_rx, updates_tx).await {
                    Ok(()) => info!("Endpoint {} listener ended", id),
                    Err(e) => error!("Endpoint {} listener failed: {}", id, e),
                }
            });
        }
        // The queue closes once every listener has dropped its sender.
        drop(listeners);

        let DispatchChannels {
            mut updates_rx,
            mut shutdown_rx,
        } = dispatch;

        let result = loop {
            let update = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown_rx) => {
                    info!("Shutdown signal received, stopping dispatch");
                    break Ok(());
                }
                update = updates_rx.recv() => update,
            };
            let Some(update) = update else {
                warn!("Every endpoint listener has stopped, stopping dispatch");
                break Ok(());
            };

            let key = update.key.clone();
            let kind = update.kind();
            match self.handle_update(update).await {
                Ok(outcome) => debug!(key = %key, kind = %kind, ?outcome, "Update handled"),
                Err(e) => {
                    error!(key = %key, kind = %kind, "Correlation store failure: {}", e);
                    break Err(BridgeError::Store(e));
                }
            }
        };
        drop(updates_rx);

        if result.is_err() {
            tasks.abort_all();
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    warn!("Endpoint listener task panicked: {}", e);
                }
            }
        }

        info!("Bridge stopped");
        result
    }

    /// Reconcile one update against the store and fan it out if accepted.
    ///
    /// Endpoint failures are logged and counted; only store failures are
    /// returned as errors.
    pub async fn handle_update(&self, update: Update) -> Result<Outcome, StoreError> {
        let Update {
            key,
            revision,
            change,
        } = update;

        let (bridge_id, plan) = match self.store.revision_of(&key)? {
            Some(stored) if stored == revision => {
                debug!(key = %key, revision = %revision, "Echo or duplicate delivery, discarding");
                return Ok(Outcome::Discarded(Discard::Echo));
            }
            Some(_) => {
                let bridge_id = self.store.bridge_id_of(&key)?.ok_or_else(|| StoreError::Corrupt {
                    message: format!("{} has a revision but no bridge message", key),
                })?;
                ensure_valid(&key, bridge_id)?;
                // An older revision leaves the stored one in place.
                self.store.update_revision(&key, revision)?;
                (bridge_id, Plan::Edit)
            }
            None if matches!(change, Change::New(_)) => {
                let bridge_id = self.store.allocate_bridge_id()?;
                ensure_valid(&key, bridge_id)?;
                self.store.create_record(&key, bridge_id, revision)?;
                info!(key = %key, bridge_id = %bridge_id, "New message");
                (bridge_id, Plan::Post)
            }
            None => {
                debug!(key = %key, kind = %change.kind(), "Change to an untracked message, discarding");
                return Ok(Outcome::Discarded(Discard::Untracked));
            }
        };

        let content = match change {
            Change::New(content) | Change::Edit(content) => content,
            Change::Delete => {
                warn!(key = %key, bridge_id = %bridge_id, "Deletions are not bridged, ignoring");
                return Ok(Outcome::Rejected);
            }
        };

        if plan == Plan::Edit {
            if let Some(previous) = self.store.content_of(bridge_id)? {
                let unchanged = previous == content;
                debug!(
                    key = %key,
                    bridge_id = %bridge_id,
                    unchanged,
                    "Replacing {} chars with {}",
                    previous.markdown.chars().count(),
                    content.markdown.chars().count()
                );
            }
        }
        self.store.record_content(bridge_id, &content)?;

        let (delivered, failed) = match plan {
            Plan::Post => self.fan_out_new(&key, bridge_id, &content).await?,
            Plan::Edit => self.fan_out_edit(&key, bridge_id, &content).await?,
        };

        if failed > 0 {
            warn!(
                key = %key,
                bridge_id = %bridge_id,
                "Partial fan-out: {} delivered, {} failed",
                delivered,
                failed
            );
        } else {
            debug!(key = %key, bridge_id = %bridge_id, "Fanned out to {} endpoints", delivered);
        }

        Ok(Outcome::FannedOut {
            bridge_id,
            delivered,
            failed,
        })
    }

    /// Post a new message on every endpoint but the origin and track each copy.
    async fn fan_out_new(
        &self,
        origin: &MessageKey,
        bridge_id: BridgeMessageId,
        content: &Content,
    ) -> Result<(usize, usize), StoreError> {
        let mut delivered = 0;
        let mut failed = 0;

        for (&eid, endpoint) in &self.endpoints {
            if eid == origin.endpoint {
                continue;
            }
            match self.call(endpoint.apply_new(content)).await {
                Ok((id, revision)) => {
                    let copy = MessageKey::new(eid, id);
                    self.store.create_record(&copy, bridge_id, revision)?;
                    debug!(copy = %copy, bridge_id = %bridge_id, "Posted copy");
                    delivered += 1;
                }
                Err(e) => {
                    warn!(eid = %eid, bridge_id = %bridge_id, "Failed to post on endpoint: {}", e);
                    failed += 1;
                }
            }
        }

        Ok((delivered, failed))
    }

    /// Edit every tracked copy of a bridge message but the origin.
    async fn fan_out_edit(
        &self,
        origin: &MessageKey,
        bridge_id: BridgeMessageId,
        content: &Content,
    ) -> Result<(usize, usize), StoreError> {
        let mut delivered = 0;
        let mut failed = 0;

        for copy in self.store.messages_for(bridge_id)? {
            if copy.endpoint == origin.endpoint {
                continue;
            }
            let Some(endpoint) = self.endpoints.get(&copy.endpoint) else {
                warn!(copy = %copy, bridge_id = %bridge_id, "Endpoint is no longer configured, skipping copy");
                continue;
            };
            match self.call(endpoint.apply_edit(&copy.id, content)).await {
                Ok(revision) => {
                    self.store.update_revision(&copy, revision)?;
                    debug!(copy = %copy, bridge_id = %bridge_id, "Edited copy");
                    delivered += 1;
                }
                Err(e) => {
                    warn!(copy = %copy, bridge_id = %bridge_id, "Failed to edit copy: {}", e);
                    failed += 1;
                }
            }
        }

        Ok((delivered, failed))
    }

    /// Bound an apply-call by the request timeout.
    async fn call<T>(&self, request: impl Future<Output = EndpointResult<T>>) -> EndpointResult<T> {
        timeout(self.request_timeout, request)
            .await
            .unwrap_or(Err(EndpointError::Timeout))
    }
}

fn ensure_valid(key: &MessageKey, bridge_id: BridgeMessageId) -> Result<(), StoreError> {
    if bridge_id.is_none() {
        return Err(StoreError::InvalidBridgeId(key.clone()));
    }
    Ok(())
}
