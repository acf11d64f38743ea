//! Identifiers and message types shared by the store, the endpoints and the bridge.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of one configured platform connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub u32);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message identifier, meaningful only within one platform.
///
/// Kept as text even where the platform uses numeric ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlatformMessageId(pub String);

impl PlatformMessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlatformMessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PlatformMessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for PlatformMessageId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for PlatformMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Globally unique identity of one platform-local message: `(endpoint, platform id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageKey {
    pub endpoint: EndpointId,
    pub id: PlatformMessageId,
}

impl MessageKey {
    pub fn new(endpoint: EndpointId, id: impl Into<PlatformMessageId>) -> Self {
        Self {
            endpoint,
            id: id.into(),
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.endpoint, self.id)
    }
}

/// Canonical cross-platform identity of one logical message.
///
/// Zero means "none" and is never handed out by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BridgeMessageId(pub u64);

impl BridgeMessageId {
    pub const NONE: BridgeMessageId = BridgeMessageId(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BridgeMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Platform-reported creation or edit time of a message.
///
/// Only used as a version marker: equal revisions identify echoes and
/// duplicate deliveries, larger revisions are newer edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(DateTime<Utc>);

impl Revision {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// Revision from a unix timestamp in seconds (Telegram dates).
    pub fn from_unix_seconds(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(Self)
    }

    /// Revision from the nanosecond representation used by the durable store.
    pub fn from_nanos(nanos: i64) -> Self {
        Self(DateTime::from_timestamp_nanos(nanos))
    }

    /// Nanoseconds since the unix epoch, if representable in an `i64`.
    pub fn as_nanos(&self) -> Option<i64> {
        self.0.timestamp_nanos_opt()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// Normalized message body relayed to every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Content {
    /// Markdown text.
    pub markdown: String,
}

impl Content {
    pub fn text(markdown: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
        }
    }
}

/// What an update does to the message it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    New(Content),
    Edit(Content),
    /// Reserved. Deletions are rejected by the bridge.
    Delete,
}

impl Change {
    pub fn kind(&self) -> UpdateKind {
        match self {
            Change::New(_) => UpdateKind::New,
            Change::Edit(_) => UpdateKind::Edit,
            Change::Delete => UpdateKind::Delete,
        }
    }
}

/// Payload-free tag of a [`Change`], for logs and dispatch decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    New,
    Edit,
    Delete,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateKind::New => "new",
            UpdateKind::Edit => "edit",
            UpdateKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One inbound event from an endpoint, in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub key: MessageKey,
    pub revision: Revision,
    pub change: Change,
}

impl Update {
    pub fn new_message(key: MessageKey, content: Content, revision: Revision) -> Self {
        Self {
            key,
            revision,
            change: Change::New(content),
        }
    }

    pub fn edit(key: MessageKey, content: Content, revision: Revision) -> Self {
        Self {
            key,
            revision,
            change: Change::Edit(content),
        }
    }

    pub fn delete(key: MessageKey, revision: Revision) -> Self {
        Self {
            key,
            revision,
            change: Change::Delete,
        }
    }

    pub fn kind(&self) -> UpdateKind {
        self.change.kind()
    }

    /// Message body, absent for deletions.
    pub fn content(&self) -> Option<&Content> {
        match &self.change {
            Change::New(content) | Change::Edit(content) => Some(content),
            Change::Delete => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_key_display() {
        let key = MessageKey::new(EndpointId(1), "a1");
        assert_eq!(key.to_string(), "1:a1");
    }

    #[test]
    fn test_numeric_platform_ids_are_text() {
        let key = MessageKey::new(EndpointId(2), 4217_i64);
        assert_eq!(key.id.as_str(), "4217");
    }

    #[test]
    fn test_bridge_message_id_none() {
        assert!(BridgeMessageId::NONE.is_none());
        assert!(!BridgeMessageId(1).is_none());
    }

    #[test]
    fn test_revision_ordering() {
        let earlier = Revision::from_unix_seconds(100).unwrap();
        let later = Revision::from_unix_seconds(150).unwrap();
        assert!(earlier < later);
        assert_eq!(earlier, Revision::from_unix_seconds(100).unwrap());
    }

    #[test]
    fn test_revision_nanos_round_trip_keeps_subsecond_precision() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:30:45.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let revision = Revision::new(at);
        let nanos = revision.as_nanos().unwrap();
        assert_eq!(Revision::from_nanos(nanos), revision);
    }

    #[test]
    fn test_update_kind_and_content() {
        let key = MessageKey::new(EndpointId(1), "a1");
        let rev = Revision::from_unix_seconds(100).unwrap();

        let new = Update::new_message(key.clone(), Content::text("hello"), rev);
        assert_eq!(new.kind(), UpdateKind::New);
        assert_eq!(new.content().unwrap().markdown, "hello");

        let delete = Update::delete(key, rev);
        assert_eq!(delete.kind(), UpdateKind::Delete);
        assert!(delete.content().is_none());
    }
}
