//! Model types shared between the row store, cache, and sync layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized entity row.
///
/// The row store persists one of these per `(feature, id, scope)`; the
/// payload is the feature-specific JSON body. Everything the remote
/// source returns is normalized into this shape at the wire boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
            updated_at: Utc::now(),
        }
    }
}

/// What kind of timeline entry an item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Message,
    Transaction,
}

/// Whether a timeline item is locally tentative or server-confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Optimistic,
    Confirmed,
}

/// One entry in a reverse-chronological feed (messages or transactions).
///
/// Exactly one item exists per logical `id` in any materialized page.
/// An optimistic placeholder carries a `temp_id`; the confirmed item the
/// server later returns echoes the same `temp_id` so the placeholder can
/// be superseded instead of duplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    pub kind: TimelineKind,
    pub id: String,
    /// The conversation or counterparty grouping this item belongs to.
    pub interaction_id: String,
    pub created_at: DateTime<Utc>,
    /// Monotonic ordering key, ascending = oldest first.
    pub sort_key: i64,
    pub lifecycle: Lifecycle,
    /// Correlation id linking an optimistic placeholder to its confirmed
    /// counterpart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    pub body: serde_json::Value,
}

impl TimelineItem {
    pub fn is_optimistic(&self) -> bool {
        self.lifecycle == Lifecycle::Optimistic
    }
}

/// Persisted incremental-sync position for one stream.
///
/// `last_sync_timestamp` is the server-reported high-water mark;
/// `next_cursor` is an opaque continuation token for an unfinished
/// backlog. Both survive restart so sync resumes instead of refetching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub last_sync_timestamp: Option<String>,
    pub next_cursor: Option<String>,
}

impl SyncCursor {
    /// Whether the incremental backlog has been fully drained.
    pub fn backlog_complete(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// The payload a cache entry carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "shape", content = "items")]
pub enum CacheValue {
    Records(Vec<Record>),
    Timeline(Vec<TimelineItem>),
}

impl CacheValue {
    pub fn len(&self) -> usize {
        match self {
            Self::Records(records) => records.len(),
            Self::Timeline(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_timeline(&self) -> Option<&[TimelineItem]> {
        match self {
            Self::Timeline(items) => Some(items),
            Self::Records(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursor_default_is_cold() {
        let cursor = SyncCursor::default();
        assert!(cursor.last_sync_timestamp.is_none());
        assert!(cursor.backlog_complete());
    }

    #[test]
    fn cursor_with_backlog() {
        let cursor = SyncCursor {
            last_sync_timestamp: Some("2026-01-01T00:00:00Z".to_string()),
            next_cursor: Some("opaque-token".to_string()),
        };
        assert!(!cursor.backlog_complete());
    }

    #[test]
    fn timeline_item_roundtrips_through_json() {
        let item = TimelineItem {
            kind: TimelineKind::Message,
            id: "m1".to_string(),
            interaction_id: "conv-1".to_string(),
            created_at: Utc::now(),
            sort_key: 42,
            lifecycle: Lifecycle::Confirmed,
            temp_id: None,
            body: json!({"text": "hi"}),
        };
        let encoded = serde_json::to_string(&item).unwrap();
        let decoded: TimelineItem = serde_json::from_str(&encoded).unwrap();
        assert_eq!(item, decoded);
    }

    #[test]
    fn cache_value_len() {
        let value = CacheValue::Records(vec![Record::new("r1", json!({}))]);
        assert_eq!(value.len(), 1);
        assert!(!value.is_empty());
        assert!(value.as_timeline().is_none());
    }
}
