//! Decoding of server payloads into feed types.
//!
//! Transport adapters receive JSON snapshot envelopes and named channel
//! events. Each [`FeedKind`] knows the envelope key and event names used by
//! its screen-side feed; records share one shape across all kinds.

use crate::error::{FeedError, Result};
use crate::types::{FeedItem, ItemId, RemoteEvent, Timestamp};
use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;

/// Which server feed an adapter is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Notifications,
    Chat,
    Locations,
}

impl FeedKind {
    /// Key of the item array in a snapshot response body.
    pub fn snapshot_key(&self) -> &'static str {
        match self {
            FeedKind::Notifications => "notifications",
            FeedKind::Chat => "messages",
            FeedKind::Locations => "locations",
        }
    }

    /// Channel event names an adapter should listen for.
    pub fn event_names(&self) -> &'static [&'static str] {
        match self {
            FeedKind::Notifications => &[
                "new-notification",
                "notification-marked-as-read",
                "notification-deleted",
            ],
            FeedKind::Chat => &["receiveMessage"],
            FeedKind::Locations => &["new-location"],
        }
    }

    /// Decode a snapshot response body.
    ///
    /// Accepts the keyed envelope or a bare array. An envelope without the
    /// key is an empty snapshot.
    pub fn decode_snapshot(&self, body: &Value) -> Result<Vec<FeedItem>> {
        let records = match body {
            Value::Array(records) => records,
            Value::Object(map) => match map.get(self.snapshot_key()) {
                Some(Value::Array(records)) => records,
                Some(Value::Null) | None => return Ok(Vec::new()),
                Some(other) => {
                    return Err(FeedError::Decode(format!(
                        "expected array under '{}', got {}",
                        self.snapshot_key(),
                        type_name(other)
                    )))
                }
            },
            other => {
                return Err(FeedError::Decode(format!(
                    "expected snapshot object or array, got {}",
                    type_name(other)
                )))
            }
        };

        records.iter().map(decode_record).collect()
    }

    /// Decode one named channel event.
    ///
    /// Returns `Ok(None)` for event names this kind does not handle.
    pub fn decode_event(&self, name: &str, payload: &Value) -> Result<Option<RemoteEvent>> {
        let event = match (self, name) {
            (FeedKind::Notifications, "new-notification")
            | (FeedKind::Chat, "receiveMessage")
            | (FeedKind::Locations, "new-location") => RemoteEvent::Created {
                item: decode_record(payload)?,
            },
            (FeedKind::Notifications, "notification-marked-as-read") => RemoteEvent::Read {
                id: decode_id_ref(payload)?,
            },
            (FeedKind::Notifications, "notification-deleted") => RemoteEvent::Deleted {
                id: decode_id_ref(payload)?,
            },
            _ => {
                tracing::debug!(kind = ?self, event = name, "ignoring unhandled channel event");
                return Ok(None);
            }
        };
        Ok(Some(event))
    }
}

/// Decode a tagged frame: `{"kind": "created", "item": {...}}` and friends.
pub fn decode_frame(text: &str) -> Result<RemoteEvent> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| FeedError::Decode("frame has no 'kind'".to_string()))?;

    match kind {
        "created" | "updated" => {
            let item = value
                .get("item")
                .ok_or_else(|| FeedError::Decode(format!("'{}' frame has no 'item'", kind)))?;
            let item = decode_record(item)?;
            Ok(if kind == "created" {
                RemoteEvent::Created { item }
            } else {
                RemoteEvent::Updated { item }
            })
        }
        "deleted" | "read" => {
            let id = value
                .get("id")
                .ok_or_else(|| FeedError::Decode(format!("'{}' frame has no 'id'", kind)))?;
            let id = decode_id_ref(id)?;
            Ok(if kind == "deleted" {
                RemoteEvent::Deleted { id }
            } else {
                RemoteEvent::Read { id }
            })
        }
        other => Err(FeedError::Decode(format!("unknown frame kind '{}'", other))),
    }
}

/// Decode a server record object into a feed item.
///
/// The whole object is kept as the payload.
pub fn decode_record(value: &Value) -> Result<FeedItem> {
    let map = value
        .as_object()
        .ok_or_else(|| FeedError::Decode(format!("expected record object, got {}", type_name(value))))?;

    let id = map
        .get("id")
        .ok_or_else(|| FeedError::Decode("record has no 'id'".to_string()))
        .and_then(decode_id)?;

    let is_read = match map.get("is_read") {
        Some(Value::Bool(b)) => *b,
        // Some backends serialize booleans as 0/1.
        Some(Value::Number(n)) => n.as_u64().map(|n| n != 0).unwrap_or(false),
        _ => false,
    };

    let created_at = match map.get("created_at") {
        None | Some(Value::Null) => Timestamp::now(),
        Some(v) => decode_timestamp(v)?,
    };

    Ok(FeedItem {
        id,
        payload: value.clone(),
        is_read,
        created_at,
    })
}

fn decode_id(value: &Value) -> Result<ItemId> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(ItemId(s.clone())),
        Value::Number(n) if n.is_u64() || n.is_i64() => Ok(ItemId(n.to_string())),
        other => Err(FeedError::Decode(format!("invalid id {}", other))),
    }
}

/// An id given directly or as `{"id": ...}`.
fn decode_id_ref(value: &Value) -> Result<ItemId> {
    match value.get("id") {
        Some(inner) => decode_id(inner),
        None => decode_id(value),
    }
}

fn decode_timestamp(value: &Value) -> Result<Timestamp> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Timestamp::from_millis)
            .ok_or_else(|| FeedError::Decode(format!("invalid timestamp {}", n))),
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(Timestamp(dt.timestamp_micros()));
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .map(|dt| Timestamp(dt.and_utc().timestamp_micros()))
                .map_err(|e| FeedError::Decode(format!("invalid timestamp '{}': {}", s, e)))
        }
        other => Err(FeedError::Decode(format!("invalid timestamp {}", other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
