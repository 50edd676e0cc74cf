//! The reconciliation engine: read protocol, single-flight scheduling,
//! delta application, and retry bookkeeping.

use crate::{RemoteSource, ReconcileResult, SyncDelta};
use billfold_core::{CacheKey, CacheValue, Record, SyncCursor, TimelineItem};
use cache_store::{BehaviorSnapshot, CacheEntry, CacheStore, NetworkQuality, StalenessPolicy};
use chrono::{DateTime, Duration, Utc};
use invalidation_debounce_router::{EventBus, EventPayload, Topic};
use local_row_store::RowStore;
use profile_scope_guard::ScopeGuard;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use timeline_cursor_merge::{merge_page, PageDirection, PageWindow, TimelinePage};
use tracing::{debug, info, trace, warn};

/// Backoff and retry tuning.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Failures beyond this stop rescheduling until a pass succeeds or
    /// the process restarts.
    pub max_retries: u32,
    /// Timeline entries are cached in pages of this size.
    pub timeline_page_size: usize,
    /// At most this many timeline pages stay resident in a cache entry.
    /// Older history remains in the row store and is not materialized.
    pub max_timeline_pages: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::seconds(2),
            backoff_max: Duration::seconds(300),
            max_retries: 5,
            timeline_page_size: 50,
            max_timeline_pages: 8,
        }
    }
}

/// `base * 2^(n-1)`, capped at `backoff_max`.
fn compute_backoff(config: &ReconcileConfig, failures: u32) -> Duration {
    if failures == 0 {
        return Duration::zero();
    }
    let exponent = failures.saturating_sub(1).min(16);
    let backoff = config.backoff_base * 2i32.pow(exponent);
    backoff.min(config.backoff_max)
}

#[derive(Debug, Clone, Default)]
struct RetryState {
    failures: u32,
    last_attempt: Option<DateTime<Utc>>,
}

impl RetryState {
    fn is_due(&self, config: &ReconcileConfig, now: DateTime<Utc>) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => now >= last + compute_backoff(config, self.failures),
        }
    }
}

#[derive(Default)]
struct EngineState {
    /// Keys with a pass in flight. Single-flight: a stale read of one of
    /// these coalesces onto the running pass instead of starting another.
    in_flight: HashSet<CacheKey>,
    retry: HashMap<CacheKey, RetryState>,
    /// Keys that went stale during a profile switch, replayed on
    /// [`Topic::ProfileSwitched`].
    queued: HashSet<CacheKey>,
}

/// Read-then-reconcile engine.
///
/// [`ReconcileEngine::read`] is the UI's entry point: it returns the
/// local value synchronously (cache, falling back to the row store) and,
/// when that value is past its TTL, schedules one background pass for
/// the key. A pass fetches the remote delta from the stream's persisted
/// cursor, applies deletions then upserts to the row store, advances the
/// cursor, and replaces the cache entry under a fresh TTL.
///
/// Results are committed only if the account scope captured with the key
/// at schedule time is still active; passes overtaken by a profile
/// switch are discarded whole.
pub struct ReconcileEngine {
    cache: Arc<CacheStore>,
    rows: Arc<RowStore>,
    remote: Arc<dyn RemoteSource>,
    bus: Arc<EventBus>,
    guard: Arc<ScopeGuard>,
    config: ReconcileConfig,
    behavior: RwLock<BehaviorSnapshot>,
    state: Mutex<EngineState>,
}

impl ReconcileEngine {
    pub fn new(
        cache: Arc<CacheStore>,
        rows: Arc<RowStore>,
        remote: Arc<dyn RemoteSource>,
        bus: Arc<EventBus>,
        guard: Arc<ScopeGuard>,
    ) -> Self {
        Self::with_config(cache, rows, remote, bus, guard, ReconcileConfig::default())
    }

    pub fn with_config(
        cache: Arc<CacheStore>,
        rows: Arc<RowStore>,
        remote: Arc<dyn RemoteSource>,
        bus: Arc<EventBus>,
        guard: Arc<ScopeGuard>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            cache,
            rows,
            remote,
            bus,
            guard,
            config,
            behavior: RwLock::new(BehaviorSnapshot::default()),
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Swap the behavior snapshot feeding TTL decisions and the offline
    /// gate. Called by the host app on lifecycle/network changes.
    pub fn set_behavior(&self, behavior: BehaviorSnapshot) {
        *self.behavior.write().expect("lock poisoned") = behavior;
    }

    pub fn behavior(&self) -> BehaviorSnapshot {
        self.behavior.read().expect("lock poisoned").clone()
    }

    /// Serve a key locally, scheduling reconciliation if it is stale.
    ///
    /// Never awaits the network. A cold key is populated from the row
    /// store as an immediately-stale entry, so the first read both
    /// renders and kicks off the first sync. A key violating profile
    /// isolation errors under a strict guard and reads as empty under a
    /// non-strict one.
    pub fn read(self: &Arc<Self>, key: &CacheKey) -> ReconcileResult<CacheEntry> {
        if !self.guard.admit(key)? {
            // Violation under a non-strict guard: nothing is served,
            // cached, or scheduled for this key.
            return Ok(CacheEntry::empty());
        }

        let entry = match self.cache.get(key) {
            Some(entry) => entry,
            None => {
                let records = self.rows.read(key.feature, key.scope.as_ref())?;
                let entry = CacheEntry::local_served(self.materialize(key, records));
                self.cache.replace(key, entry.clone());
                entry
            }
        };

        if entry.is_stale(Utc::now()) {
            self.maybe_schedule(key);
        }
        Ok(entry)
    }

    /// Schedule a background pass for a key, unless one is already in
    /// flight, the key is inside its backoff window, the network is
    /// offline, or a profile switch is sweeping (in which case the key
    /// is queued and replayed after the switch).
    pub fn maybe_schedule(self: &Arc<Self>, key: &CacheKey) {
        if self.guard.is_switching() {
            let mut state = self.state.lock().expect("lock poisoned");
            state.queued.insert(key.clone());
            debug!(key = %key, "Profile switch in progress, queueing reconciliation");
            return;
        }
        if self.behavior().network == NetworkQuality::Offline {
            trace!(key = %key, "Offline, skipping reconciliation");
            return;
        }
        if !self.try_begin_pass(key) {
            return;
        }

        let engine = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            engine.run_pass(key).await;
        });
    }

    /// Run one pass for a key inline, with the same gating as
    /// [`ReconcileEngine::maybe_schedule`]. Used where the caller needs
    /// completion, e.g. pull-to-refresh.
    pub async fn reconcile_now(self: &Arc<Self>, key: &CacheKey) {
        if self.guard.is_switching() {
            let mut state = self.state.lock().expect("lock poisoned");
            state.queued.insert(key.clone());
            return;
        }
        if self.behavior().network == NetworkQuality::Offline {
            return;
        }
        if self.try_begin_pass(key) {
            self.clone().run_pass(key.clone()).await;
        }
    }

    /// Replay reconciliations that were deferred by a profile switch.
    /// Keys now foreign to the active scope are dropped, not replayed.
    pub fn drain_queued(self: &Arc<Self>) {
        let queued: Vec<CacheKey> = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.queued.drain().collect()
        };
        for key in queued {
            if self.guard.assert_scoped(&key).is_ok() {
                self.maybe_schedule(&key);
            } else {
                debug!(key = %key, "Dropping queued reconciliation for foreign scope");
            }
        }
    }

    /// Whether no pass is in flight (tests and shutdown).
    pub fn is_idle(&self) -> bool {
        self.state
            .lock()
            .expect("lock poisoned")
            .in_flight
            .is_empty()
    }

    /// Claim the key for a pass. Returns false when coalescing onto an
    /// in-flight pass or still inside the backoff window.
    fn try_begin_pass(&self, key: &CacheKey) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.in_flight.contains(key) {
            trace!(key = %key, "Pass already in flight, coalescing");
            return false;
        }
        if let Some(retry) = state.retry.get(key) {
            if retry.failures > self.config.max_retries {
                trace!(key = %key, failures = retry.failures, "Retry budget exhausted");
                return false;
            }
            if !retry.is_due(&self.config, Utc::now()) {
                trace!(key = %key, "Inside backoff window");
                return false;
            }
        }
        state.in_flight.insert(key.clone());
        drop(state);

        self.cache.mark_fetching(key);
        debug!(key = %key, "Reconciliation pass scheduled");
        true
    }

    async fn run_pass(self: Arc<Self>, key: CacheKey) {
        let cursor = match self.rows.get_cursor(key.feature, key.scope.as_ref()) {
            Ok(cursor) => cursor.unwrap_or_default(),
            Err(err) => {
                self.fail_pass(&key, &err.to_string());
                return;
            }
        };

        match self
            .remote
            .fetch(key.feature, cursor, key.scope.clone())
            .await
        {
            Ok(delta) => {
                if let Err(err) = self.commit_pass(&key, delta) {
                    self.fail_pass(&key, &err.to_string());
                }
            }
            Err(err) => self.fail_pass(&key, &err.to_string()),
        }
    }

    /// Apply a fetched delta: revalidate the scope, write deletions then
    /// upserts, advance the cursor, rebuild the cache entry, announce.
    fn commit_pass(self: &Arc<Self>, key: &CacheKey, delta: SyncDelta) -> ReconcileResult<()> {
        if let Some(scope) = &key.scope {
            if !self.guard.still_active(scope) {
                debug!(key = %key, "Discarding pass fetched under a stale scope");
                self.finish_pass(key, false);
                return Ok(());
            }
        }

        let SyncDelta {
            upserts,
            deletions,
            next_cursor,
            sync_timestamp,
        } = delta;

        // Tombstones win within a pass: an id both deleted and upserted
        // in the same delta ends up absent.
        let tombstoned: HashSet<&str> = deletions.iter().map(String::as_str).collect();
        let upserts: Vec<Record> = upserts
            .into_iter()
            .filter(|r| !tombstoned.contains(r.id.as_str()))
            .collect();

        let removed = self.rows.delete(key.feature, key.scope.as_ref(), &deletions)?;
        self.rows.upsert(key.feature, key.scope.as_ref(), &upserts)?;

        let cursor = SyncCursor {
            last_sync_timestamp: Some(sync_timestamp),
            next_cursor,
        };
        self.rows.put_cursor(key.feature, key.scope.as_ref(), &cursor)?;

        let records = self.rows.read(key.feature, key.scope.as_ref())?;
        let value = if key.feature.is_timeline() {
            // Optimistic placeholders the delta did not confirm survive
            // the rebuild; everything confirmed comes from the rows.
            let pending: Vec<TimelineItem> = self
                .cache
                .get(key)
                .and_then(|entry| entry.data)
                .and_then(|value| {
                    value
                        .as_timeline()
                        .map(|items| items.iter().filter(|i| i.is_optimistic()).cloned().collect())
                })
                .unwrap_or_default();
            let confirmed =
                self.bound_timeline(select_for_key(key, timeline_items(&records)));
            CacheValue::Timeline(merge_page(&pending, &confirmed, PageDirection::Forward))
        } else {
            CacheValue::Records(records)
        };

        let ttl = StalenessPolicy::ttl_for_feature(key.feature, &self.behavior());
        self.cache.set(key, value, ttl);
        self.finish_pass(key, true);

        info!(
            key = %key,
            upserts = upserts.len(),
            deletions = removed,
            backlog_complete = cursor.backlog_complete(),
            "Reconciliation pass committed"
        );
        self.bus.emit(
            Topic::SyncCompleted,
            EventPayload {
                scope: key.scope.clone(),
                feature: Some(key.feature),
                ..EventPayload::default()
            },
        );

        // An unfinished backlog chains straight into the next page.
        if !cursor.backlog_complete() {
            self.maybe_schedule(key);
        }
        Ok(())
    }

    fn finish_pass(&self, key: &CacheKey, success: bool) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.in_flight.remove(key);
        if success {
            state.retry.remove(key);
        }
    }

    /// Build the cache value a key serves from row-store records,
    /// bounding timelines to the resident page window.
    fn materialize(&self, key: &CacheKey, records: Vec<Record>) -> CacheValue {
        if key.feature.is_timeline() {
            let items = select_for_key(key, timeline_items(&records));
            CacheValue::Timeline(self.bound_timeline(items))
        } else {
            CacheValue::Records(records)
        }
    }

    /// Run a full timeline through the page window: the collection is
    /// chunked into pages and only the newest `max_timeline_pages` stay
    /// resident. Deep history lives in the row store, not the cache.
    fn bound_timeline(&self, items: Vec<TimelineItem>) -> Vec<TimelineItem> {
        let page_size = self.config.timeline_page_size.max(1);
        let max_pages = self.config.max_timeline_pages.max(1);
        let sorted = merge_page(&[], &items, PageDirection::Forward);
        if sorted.len() <= page_size * max_pages {
            return sorted;
        }

        let mut window = PageWindow::new(max_pages);
        for (index, chunk) in sorted.chunks(page_size).enumerate() {
            window.push(TimelinePage::new(Some(index.to_string()), chunk.to_vec()));
        }
        window.materialize()
    }

    /// Failure path: the cached value and the cursor stay exactly as
    /// they were; only the fetch status and the retry clock move.
    fn fail_pass(&self, key: &CacheKey, error: &str) {
        self.cache.mark_error(key, error);
        let mut state = self.state.lock().expect("lock poisoned");
        state.in_flight.remove(key);
        let retry = state.retry.entry(key.clone()).or_default();
        retry.failures += 1;
        retry.last_attempt = Some(Utc::now());
        warn!(key = %key, failures = retry.failures, error, "Reconciliation pass failed");
    }
}

/// Decode row payloads into timeline items, skipping rows that do not
/// decode (logged, never fatal).
fn timeline_items(records: &[Record]) -> Vec<TimelineItem> {
    records
        .iter()
        .filter_map(|record| {
            match serde_json::from_value::<TimelineItem>(record.payload.clone()) {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!(id = %record.id, %err, "Skipping undecodable timeline row");
                    None
                }
            }
        })
        .collect()
}

/// Restrict timeline items to the key's interaction, when the key names
/// one (first param).
fn select_for_key(key: &CacheKey, items: Vec<TimelineItem>) -> Vec<TimelineItem> {
    match key.params.first() {
        Some(interaction_id) => items
            .into_iter()
            .filter(|item| &item.interaction_id == interaction_id)
            .collect(),
        None => items,
    }
}
