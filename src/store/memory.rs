//! In-memory correlation store, for tests and ephemeral deployments.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::error::{StoreError, StoreResult};
use crate::common::types::{BridgeMessageId, Content, MessageKey, Revision};
use crate::store::CorrelationStore;

#[derive(Debug, Clone, Copy)]
struct Record {
    bridge_id: BridgeMessageId,
    revision: Revision,
}

#[derive(Debug, Default)]
struct BridgeEntry {
    copies: Vec<MessageKey>,
    content: Option<Content>,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<MessageKey, Record>,
    bridge_messages: HashMap<BridgeMessageId, BridgeEntry>,
    last_id: u64,
}

/// Map-backed store living for the process lifetime.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }
}

impl CorrelationStore for MemoryStore {
    fn revision_of(&self, key: &MessageKey) -> StoreResult<Option<Revision>> {
        Ok(self.read()?.records.get(key).map(|r| r.revision))
    }

    fn bridge_id_of(&self, key: &MessageKey) -> StoreResult<Option<BridgeMessageId>> {
        Ok(self.read()?.records.get(key).map(|r| r.bridge_id))
    }

    fn allocate_bridge_id(&self) -> StoreResult<BridgeMessageId> {
        let mut state = self.write()?;
        state.last_id += 1;
        let id = BridgeMessageId(state.last_id);
        state.bridge_messages.insert(id, BridgeEntry::default());
        Ok(id)
    }

    fn create_record(
        &self,
        key: &MessageKey,
        bridge_id: BridgeMessageId,
        revision: Revision,
    ) -> StoreResult<()> {
        if bridge_id.is_none() {
            return Err(StoreError::InvalidBridgeId(key.clone()));
        }

        let mut state = self.write()?;
        if state.records.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.clone()));
        }

        let entry = state
            .bridge_messages
            .get_mut(&bridge_id)
            .ok_or(StoreError::UnknownBridgeMessage(bridge_id))?;
        if entry.copies.iter().any(|k| k.endpoint == key.endpoint) {
            return Err(StoreError::DuplicateEndpoint {
                bridge_id,
                endpoint: key.endpoint,
            });
        }
        entry.copies.push(key.clone());
        entry.copies.sort();

        state.records.insert(
            key.clone(),
            Record {
                bridge_id,
                revision,
            },
        );
        Ok(())
    }

    fn update_revision(&self, key: &MessageKey, revision: Revision) -> StoreResult<()> {
        let mut state = self.write()?;
        let record = state
            .records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if revision > record.revision {
            record.revision = revision;
        }
        Ok(())
    }

    fn messages_for(&self, bridge_id: BridgeMessageId) -> StoreResult<Vec<MessageKey>> {
        self.read()?
            .bridge_messages
            .get(&bridge_id)
            .map(|entry| entry.copies.clone())
            .ok_or(StoreError::UnknownBridgeMessage(bridge_id))
    }

    fn record_content(&self, bridge_id: BridgeMessageId, content: &Content) -> StoreResult<()> {
        let mut state = self.write()?;
        let entry = state
            .bridge_messages
            .get_mut(&bridge_id)
            .ok_or(StoreError::UnknownBridgeMessage(bridge_id))?;
        entry.content = Some(content.clone());
        Ok(())
    }

    fn content_of(&self, bridge_id: BridgeMessageId) -> StoreResult<Option<Content>> {
        Ok(self
            .read()?
            .bridge_messages
            .get(&bridge_id)
            .and_then(|entry| entry.content.clone()))
    }
}
