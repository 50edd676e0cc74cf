//! Cache store: key/entry map with synchronous change notification.

use crate::{CacheEntry, FetchStatus};
use billfold_core::{CacheKey, CacheValue, KeyPattern};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Handle returned by [`CacheStore::subscribe`], used to unsubscribe.
pub type SubscriptionId = u64;

type Handler = Arc<dyn Fn(&CacheKey, &CacheEntry) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    pattern: KeyPattern,
    handler: Handler,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    subscribers: Vec<Subscriber>,
    next_subscription: SubscriptionId,
}

/// In-memory cache the UI reads from.
///
/// Writes replace entries atomically and notify matching subscribers
/// before the mutating call returns. Handlers run after the entry lock
/// is released (the write is already visible), so a handler may re-enter
/// the store.
///
/// The store never performs I/O; it is a derived projection of the row
/// store plus in-flight optimistic state.
#[derive(Default)]
pub struct CacheStore {
    inner: Mutex<Inner>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read an entry. Never blocks on anything but the map lock.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .entries
            .get(key)
            .cloned()
    }

    /// Replace an entry with a fresh, confirmed value valid for `ttl`.
    pub fn set(&self, key: &CacheKey, value: CacheValue, ttl: Duration) {
        self.replace(key, CacheEntry::fresh(value, ttl));
    }

    /// Replace an entry with a value served from local rows: visible
    /// immediately, already stale so reconciliation is due.
    pub fn set_local(&self, key: &CacheKey, value: CacheValue) {
        self.replace(key, CacheEntry::local_served(value));
    }

    /// Overwrite an entry wholesale. Used for optimistic merges and
    /// rollback snapshots, where staleness metadata must be preserved
    /// exactly.
    pub fn replace(&self, key: &CacheKey, entry: CacheEntry) {
        let notify = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            inner.entries.insert(key.clone(), entry.clone());
            matching_handlers(&inner, key)
        };
        dispatch(notify, key, &entry);
    }

    /// Drop an entry outright. Only the optimistic rollback path uses
    /// this, to restore a key that was cold before the mutation began.
    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .entries
            .remove(key)
    }

    /// Transition an entry to `Fetching`. Creates a data-less placeholder
    /// for a cold key so concurrent readers observe the fetch state.
    pub fn mark_fetching(&self, key: &CacheKey) {
        let (entry, notify) = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            let now = Utc::now();
            let entry = inner
                .entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry {
                    data: None,
                    fetched_at: now,
                    stale_after: now,
                    status: FetchStatus::Idle,
                    last_error: None,
                });
            entry.status = FetchStatus::Fetching;
            let entry = entry.clone();
            let notify = matching_handlers(&inner, key);
            (entry, notify)
        };
        dispatch(notify, key, &entry);
    }

    /// Record a fetch failure, keeping the last-known-good value.
    pub fn mark_error(&self, key: &CacheKey, error: &str) {
        let Some((entry, notify)) = ({
            let mut inner = self.inner.lock().expect("lock poisoned");
            match inner.entries.get_mut(key) {
                Some(entry) => {
                    entry.status = FetchStatus::Error;
                    entry.last_error = Some(error.to_string());
                    let entry = entry.clone();
                    let notify = matching_handlers(&inner, key);
                    Some((entry, notify))
                }
                None => None,
            }
        }) else {
            warn!(key = %key, "mark_error on absent entry");
            return;
        };
        dispatch(notify, key, &entry);
    }

    /// Mark every entry matching `pattern` stale. Data is kept; the
    /// last-known-good value remains visible until the next successful
    /// fetch. Returns the number of entries touched.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        self.invalidate_where(|key| pattern.matches(key))
    }

    /// Mark every entry whose key satisfies `predicate` stale.
    pub fn invalidate_where(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let touched = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            let now = Utc::now();
            let mut touched = Vec::new();
            for (key, entry) in inner.entries.iter_mut() {
                if predicate(key) {
                    // Pull stale_after back to "now" (never forward, and
                    // never below fetched_at).
                    entry.stale_after = entry.stale_after.min(now).max(entry.fetched_at);
                    touched.push((key.clone(), entry.clone()));
                }
            }
            let mut notifications = Vec::new();
            for (key, entry) in touched {
                notifications.push((key.clone(), entry, matching_handlers(&inner, &key)));
            }
            notifications
        };
        let count = touched.len();
        for (key, entry, handlers) in touched {
            dispatch(handlers, &key, &entry);
        }
        if count > 0 {
            debug!(count, "Invalidated cache entries");
        }
        count
    }

    /// Subscribe to changes on keys matching `pattern`.
    pub fn subscribe(
        &self,
        pattern: KeyPattern,
        handler: impl Fn(&CacheKey, &CacheEntry) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let id = inner.next_subscription;
        inner.next_subscription += 1;
        inner.subscribers.push(Subscriber {
            id,
            pattern,
            handler: Arc::new(handler),
        });
        id
    }

    /// Tear down a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.subscribers.retain(|s| s.id != id);
    }

    /// Number of live entries (tests and diagnostics).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn matching_handlers(inner: &Inner, key: &CacheKey) -> Vec<Handler> {
    inner
        .subscribers
        .iter()
        .filter(|s| s.pattern.matches(key))
        .map(|s| s.handler.clone())
        .collect()
}

fn dispatch(handlers: Vec<Handler>, key: &CacheKey, entry: &CacheEntry) {
    for handler in handlers {
        handler(key, entry);
    }
}
