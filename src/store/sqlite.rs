//! SQLite-backed correlation store.
//!
//! Layout:
//! - `bridge_messages(id, content)`: one row per bridge message, `content` is
//!   the latest relayed body as JSON.
//! - `platform_messages(endpoint_id, platform_message_id, bridge_message_id, revision)`:
//!   one row per platform copy, keyed by `(endpoint_id, platform_message_id)`.
//!
//! The id generator is seeded from `MAX(bridge_messages.id)` when the store is
//! opened. Only one process may write to a database file.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use crate::common::error::{StoreError, StoreResult};
use crate::common::types::{BridgeMessageId, Content, EndpointId, MessageKey, Revision};
use crate::store::CorrelationStore;

const BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bridge_messages (
    id INTEGER PRIMARY KEY,
    content TEXT
);

CREATE TABLE IF NOT EXISTS platform_messages (
    endpoint_id INTEGER NOT NULL,
    platform_message_id TEXT NOT NULL,
    bridge_message_id INTEGER NOT NULL REFERENCES bridge_messages(id),
    revision INTEGER NOT NULL,
    PRIMARY KEY (endpoint_id, platform_message_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS platform_messages_bridge_endpoint
    ON platform_messages (bridge_message_id, endpoint_id);
";

struct Inner {
    conn: Connection,
    last_id: u64,
}

/// Correlation store persisted in a single SQLite file.
///
/// A SQLite connection cannot be read from several threads at once, so every
/// call goes through one mutex; writes are additionally wrapped in transactions.
pub struct SqliteStore {
    inner: Mutex<Inner>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("SQLite journal mode: {}", journal_mode);
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;

        let max_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(id), 0) FROM bridge_messages",
            [],
            |row| row.get(0),
        )?;
        let last_id = u64::try_from(max_id).map_err(|_| StoreError::Corrupt {
            message: format!("negative bridge message id {}", max_id),
        })?;
        info!("Correlation store ready, last bridge message id {}", last_id);

        Ok(Self {
            inner: Mutex::new(Inner { conn, last_id }),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn bridge_id_to_sql(id: BridgeMessageId) -> StoreResult<i64> {
    i64::try_from(id.0).map_err(|_| StoreError::Corrupt {
        message: format!("bridge message id {} out of range", id),
    })
}

fn bridge_id_from_sql(raw: i64) -> StoreResult<BridgeMessageId> {
    u64::try_from(raw)
        .map(BridgeMessageId)
        .map_err(|_| StoreError::Corrupt {
            message: format!("negative bridge message id {}", raw),
        })
}

fn endpoint_from_sql(raw: i64) -> StoreResult<EndpointId> {
    u32::try_from(raw)
        .map(EndpointId)
        .map_err(|_| StoreError::Corrupt {
            message: format!("endpoint id {} out of range", raw),
        })
}

fn revision_to_sql(revision: Revision) -> StoreResult<i64> {
    revision.as_nanos().ok_or_else(|| StoreError::Corrupt {
        message: format!("revision {} cannot be stored", revision),
    })
}

fn bridge_message_exists(conn: &Connection, id: i64) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM bridge_messages WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

impl CorrelationStore for SqliteStore {
    fn revision_of(&self, key: &MessageKey) -> StoreResult<Option<Revision>> {
        let inner = self.lock()?;
        let nanos: Option<i64> = inner
            .conn
            .query_row(
                "SELECT revision FROM platform_messages
                 WHERE endpoint_id = ?1 AND platform_message_id = ?2",
                params![key.endpoint.0, key.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(nanos.map(Revision::from_nanos))
    }

    fn bridge_id_of(&self, key: &MessageKey) -> StoreResult<Option<BridgeMessageId>> {
        let inner = self.lock()?;
        let raw: Option<i64> = inner
            .conn
            .query_row(
                "SELECT bridge_message_id FROM platform_messages
                 WHERE endpoint_id = ?1 AND platform_message_id = ?2",
                params![key.endpoint.0, key.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(bridge_id_from_sql).transpose()
    }

    fn allocate_bridge_id(&self) -> StoreResult<BridgeMessageId> {
        let mut inner = self.lock()?;
        let id = BridgeMessageId(inner.last_id + 1);
        inner.conn.execute(
            "INSERT INTO bridge_messages (id, content) VALUES (?1, NULL)",
            params![bridge_id_to_sql(id)?],
        )?;
        inner.last_id = id.0;
        debug!("Allocated bridge message {}", id);
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
        let raw_bridge_id = bridge_id_to_sql(bridge_id)?;
        let raw_revision = revision_to_sql(revision)?;

        let mut inner = self.lock()?;
        let tx = inner
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT bridge_message_id FROM platform_messages
                 WHERE endpoint_id = ?1 AND platform_message_id = ?2",
                params![key.endpoint.0, key.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::AlreadyExists(key.clone()));
        }

        if !bridge_message_exists(&tx, raw_bridge_id)? {
            return Err(StoreError::UnknownBridgeMessage(bridge_id));
        }

        let sibling: Option<String> = tx
            .query_row(
                "SELECT platform_message_id FROM platform_messages
                 WHERE bridge_message_id = ?1 AND endpoint_id = ?2",
                params![raw_bridge_id, key.endpoint.0],
                |row| row.get(0),
            )
            .optional()?;
        if sibling.is_some() {
            return Err(StoreError::DuplicateEndpoint {
                bridge_id,
                endpoint: key.endpoint,
            });
        }

        tx.execute(
            "INSERT INTO platform_messages
                 (endpoint_id, platform_message_id, bridge_message_id, revision)
             VALUES (?1, ?2, ?3, ?4)",
            params![key.endpoint.0, key.id.as_str(), raw_bridge_id, raw_revision],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn update_revision(&self, key: &MessageKey, revision: Revision) -> StoreResult<()> {
        let raw_revision = revision_to_sql(revision)?;

        let mut inner = self.lock()?;
        let tx = inner
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored: Option<i64> = tx
            .query_row(
                "SELECT revision FROM platform_messages
                 WHERE endpoint_id = ?1 AND platform_message_id = ?2",
                params![key.endpoint.0, key.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let stored = stored.ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if raw_revision > stored {
            tx.execute(
                "UPDATE platform_messages SET revision = ?3
                 WHERE endpoint_id = ?1 AND platform_message_id = ?2",
                params![key.endpoint.0, key.id.as_str(), raw_revision],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn messages_for(&self, bridge_id: BridgeMessageId) -> StoreResult<Vec<MessageKey>> {
        let raw_bridge_id = bridge_id_to_sql(bridge_id)?;
        let inner = self.lock()?;

        if !bridge_message_exists(&inner.conn, raw_bridge_id)? {
            return Err(StoreError::UnknownBridgeMessage(bridge_id));
        }

        let mut stmt = inner.conn.prepare(
            "SELECT endpoint_id, platform_message_id FROM platform_messages
             WHERE bridge_message_id = ?1
             ORDER BY endpoint_id, platform_message_id",
        )?;
        let rows = stmt.query_map(params![raw_bridge_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut keys = Vec::new();
        for row in rows {
            let (endpoint, id) = row?;
            keys.push(MessageKey::new(endpoint_from_sql(endpoint)?, id));
        }
        Ok(keys)
    }

    fn record_content(&self, bridge_id: BridgeMessageId, content: &Content) -> StoreResult<()> {
        let raw_bridge_id = bridge_id_to_sql(bridge_id)?;
        let json = serde_json::to_string(content)?;

        let inner = self.lock()?;
        let updated = inner.conn.execute(
            "UPDATE bridge_messages SET content = ?2 WHERE id = ?1",
            params![raw_bridge_id, json],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownBridgeMessage(bridge_id));
        }
        Ok(())
    }

    fn content_of(&self, bridge_id: BridgeMessageId) -> StoreResult<Option<Content>> {
        let raw_bridge_id = bridge_id_to_sql(bridge_id)?;
        let inner = self.lock()?;
        let json: Option<Option<String>> = inner
            .conn
            .query_row(
                "SELECT content FROM bridge_messages WHERE id = ?1",
                params![raw_bridge_id],
                |row| row.get(0),
            )
            .optional()?;

        match json.flatten() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
