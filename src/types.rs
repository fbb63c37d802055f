//! Core types for the feed synchronizer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable identifier of a feed item, unique within a subject's feed.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        ItemId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        ItemId(s)
    }
}

impl From<u64> for ItemId {
    fn from(n: u64) -> Self {
        ItemId(n.to_string())
    }
}

/// Identifier of the authenticated subject whose feed is synchronized.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl fmt::Debug for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubjectId({})", self.0)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local revision stamped on every change applied to an entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Revision(pub u64);

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rev({})", self.0)
    }
}

impl Revision {
    pub fn next(self) -> Self {
        Revision(self.0 + 1)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis.saturating_mul(1000))
    }

    pub fn as_millis(&self) -> i64 {
        self.0 / 1000
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// One notification, chat message or location ping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: ItemId,

    /// Opaque content. The synchronizer never inspects it.
    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default)]
    pub is_read: bool,

    pub created_at: Timestamp,
}

impl FeedItem {
    pub fn new(id: impl Into<ItemId>, payload: serde_json::Value, created_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            payload,
            is_read: false,
            created_at,
        }
    }

    /// Builder-style read flag.
    pub fn read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }
}

/// An incremental change delivered over the push channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteEvent {
    /// A new item exists.
    Created { item: FeedItem },

    /// Full replacement of an existing item.
    Updated { item: FeedItem },

    /// The item is gone.
    Deleted { id: ItemId },

    /// The item was marked read elsewhere.
    Read { id: ItemId },
}

impl RemoteEvent {
    /// The item this event targets.
    pub fn id(&self) -> &ItemId {
        match self {
            RemoteEvent::Created { item } | RemoteEvent::Updated { item } => &item.id,
            RemoteEvent::Deleted { id } | RemoteEvent::Read { id } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RemoteEvent::Created { .. } => "created",
            RemoteEvent::Updated { .. } => "updated",
            RemoteEvent::Deleted { .. } => "deleted",
            RemoteEvent::Read { .. } => "read",
        }
    }
}

/// Push channel connectivity, as seen by the synchronizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Initial handshake in progress.
    Connecting,
    Connected,
    /// Waiting for or running a reconnect attempt.
    Reconnecting { attempt: u32 },
    /// Gave up: the credential was rejected or attempts ran out.
    Failed,
    /// Stopped locally.
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Point-in-time health of a synchronizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStatus {
    /// At least one snapshot has been reconciled.
    pub synced: bool,
    /// The last snapshot fetch failed; the collection may be partial.
    pub degraded: bool,
    pub connection: ConnectionState,
    pub revision: Revision,
}
