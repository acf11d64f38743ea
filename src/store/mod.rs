//! Correlation store: which platform messages are copies of which bridge message.
//!
//! Two views are kept over the same records:
//! - forward: `MessageKey` -> (`BridgeMessageId`, `Revision`)
//! - reverse: `BridgeMessageId` -> every `MessageKey` carrying that message
//!
//! plus the generator for new bridge message ids.
//!
//! Calls are blocking and safe for concurrent callers. The bridge issues every
//! mutating call from its single dispatch task.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use tracing::{info, warn};

use crate::common::error::StoreResult;
use crate::common::types::{BridgeMessageId, Content, MessageKey, Revision};
use crate::config::types::Config;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Durable mapping between platform-local messages and bridge messages.
pub trait CorrelationStore: Send + Sync {
    /// Stored revision of a tracked message, `None` if the key is unknown.
    fn revision_of(&self, key: &MessageKey) -> StoreResult<Option<Revision>>;

    /// Bridge message a tracked message belongs to, `None` if the key is unknown.
    fn bridge_id_of(&self, key: &MessageKey) -> StoreResult<Option<BridgeMessageId>>;

    /// Hand out a fresh bridge message id, strictly greater than every earlier one.
    fn allocate_bridge_id(&self) -> StoreResult<BridgeMessageId>;

    /// Track `key` as a copy of `bridge_id` at `revision`.
    ///
    /// Fails with `AlreadyExists` for a known key and with `DuplicateEndpoint`
    /// if the bridge message already has a copy on the key's endpoint.
    fn create_record(
        &self,
        key: &MessageKey,
        bridge_id: BridgeMessageId,
        revision: Revision,
    ) -> StoreResult<()>;

    /// Bump the stored revision. Older or equal revisions are ignored.
    fn update_revision(&self, key: &MessageKey, revision: Revision) -> StoreResult<()>;

    /// Every tracked copy of a bridge message, ordered by endpoint.
    fn messages_for(&self, bridge_id: BridgeMessageId) -> StoreResult<Vec<MessageKey>>;

    /// Remember the latest content of a bridge message.
    fn record_content(&self, bridge_id: BridgeMessageId, content: &Content) -> StoreResult<()>;

    /// Latest recorded content of a bridge message.
    fn content_of(&self, bridge_id: BridgeMessageId) -> StoreResult<Option<Content>>;
}

/// Shared store handle used across tasks.
pub type SharedStore = Arc<dyn CorrelationStore>;

/// Open the store selected by the configuration.
///
/// A configured database path selects the SQLite store; without one the
/// bridge runs on an in-memory store and forgets everything on exit.
pub fn open_store(config: &Config) -> StoreResult<SharedStore> {
    match config.bridge.database.as_deref() {
        Some(path) => {
            info!("Opening correlation database at {}", path);
            Ok(Arc::new(SqliteStore::open(path)?))
        }
        None => {
            warn!("No database configured - message correlations will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
