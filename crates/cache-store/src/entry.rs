//! Cache entry and fetch state.

use billfold_core::CacheValue;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Fetch state of a cache entry.
///
/// Transitions only `Idle -> Fetching -> {Idle, Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Idle,
    Fetching,
    Error,
}

/// One cached value plus its staleness metadata.
///
/// `stale_after >= fetched_at` always holds. `data` stays populated
/// through invalidation and fetch errors; only a successful fetch
/// replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Option<CacheValue>,
    pub fetched_at: DateTime<Utc>,
    pub stale_after: DateTime<Utc>,
    pub status: FetchStatus,
    pub last_error: Option<String>,
}

impl CacheEntry {
    /// A fresh entry valid for `ttl` from now.
    pub fn fresh(data: CacheValue, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            data: Some(data),
            fetched_at: now,
            stale_after: now + ttl.max(Duration::zero()),
            status: FetchStatus::Idle,
            last_error: None,
        }
    }

    /// An entry populated from local rows: usable immediately, but
    /// already stale so a background reconciliation is due.
    pub fn local_served(data: CacheValue) -> Self {
        let now = Utc::now();
        Self {
            data: Some(data),
            fetched_at: now,
            stale_after: now,
            status: FetchStatus::Idle,
            last_error: None,
        }
    }

    /// An entry with nothing to serve, handed to readers whose key
    /// cannot be satisfied. Never written to the store.
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            data: None,
            fetched_at: now,
            stale_after: now,
            status: FetchStatus::Idle,
            last_error: None,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.stale_after
    }

    /// Whether a failure on this entry must surface to the reader.
    /// Failures degrade silently as long as any data exists.
    pub fn error_is_visible(&self) -> bool {
        self.status == FetchStatus::Error && self.data.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billfold_core::CacheValue;

    #[test]
    fn fresh_entry_is_not_stale() {
        let entry = CacheEntry::fresh(CacheValue::Records(vec![]), Duration::seconds(30));
        assert!(!entry.is_stale(Utc::now()));
        assert!(entry.stale_after >= entry.fetched_at);
    }

    #[test]
    fn local_served_entry_is_immediately_stale() {
        let entry = CacheEntry::local_served(CacheValue::Records(vec![]));
        assert!(entry.is_stale(Utc::now()));
        assert_eq!(entry.stale_after, entry.fetched_at);
    }

    #[test]
    fn negative_ttl_clamps_to_fetched_at() {
        let entry = CacheEntry::fresh(CacheValue::Records(vec![]), Duration::seconds(-5));
        assert!(entry.stale_after >= entry.fetched_at);
    }

    #[test]
    fn empty_entry_serves_nothing_without_a_visible_error() {
        let entry = CacheEntry::empty();
        assert!(entry.data.is_none());
        assert!(!entry.error_is_visible());
    }

    #[test]
    fn error_visibility_requires_missing_data() {
        let mut entry = CacheEntry::fresh(CacheValue::Records(vec![]), Duration::seconds(30));
        entry.status = FetchStatus::Error;
        assert!(!entry.error_is_visible());

        entry.data = None;
        assert!(entry.error_is_visible());
    }
}
