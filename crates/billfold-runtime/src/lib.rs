//! The assembled data layer.
//!
//! [`DataLayer`] wires the cache store, row store, event bus, scope
//! guard, reconciliation engine, and mutation coordinator together and
//! is the single object a host application holds. Reads never await the
//! network; mutations are optimistic; all invalidation flows through
//! the bus routing table.

mod config;
mod logging;

pub use config::RuntimeConfig;
pub use logging::init_logging;

pub use billfold_core::{
    CacheKey, CacheValue, Feature, KeyPattern, Lifecycle, ProfileScope, Record, SyncCursor,
    TimelineItem, TimelineKind,
};
pub use cache_store::{
    ActivityLevel, BehaviorSnapshot, CacheEntry, FetchStatus, NetworkQuality, SubscriptionId,
};
pub use invalidation_debounce_router::{EventPayload, Topic};
pub use optimistic_mutation_coordinator::{MutationResult, MutationTicket};
pub use reconcile_retriable_worker::{ReconcileError, ReconcileResult, RemoteSource};

use cache_store::CacheStore;
use invalidation_debounce_router::{routes_for, EventBus};
use local_row_store::RowStore;
use optimistic_mutation_coordinator::MutationCoordinator;
use profile_scope_guard::ScopeGuard;
use reconcile_retriable_worker::{HttpRemoteSource, ReconcileEngine};
use std::sync::Arc;
use tracing::info;

/// The app-facing data layer.
pub struct DataLayer {
    cache: Arc<CacheStore>,
    rows: Arc<RowStore>,
    bus: Arc<EventBus>,
    guard: Arc<ScopeGuard>,
    engine: Arc<ReconcileEngine>,
    mutations: MutationCoordinator,
}

impl DataLayer {
    /// Open the data layer against the real sync API.
    pub fn open(config: &RuntimeConfig, initial_scope: ProfileScope) -> anyhow::Result<Self> {
        let rows = RowStore::open(&config.db_path)?;
        let remote = Arc::new(HttpRemoteSource::new(config.api_base_url.clone())?);
        Ok(Self::assemble(config, rows, remote, initial_scope))
    }

    /// Open the data layer with a caller-supplied remote source and row
    /// store (tests, previews, offline fixtures).
    pub fn with_remote(
        config: &RuntimeConfig,
        rows: RowStore,
        remote: Arc<dyn RemoteSource>,
        initial_scope: ProfileScope,
    ) -> Self {
        Self::assemble(config, rows, remote, initial_scope)
    }

    fn assemble(
        config: &RuntimeConfig,
        rows: RowStore,
        remote: Arc<dyn RemoteSource>,
        initial_scope: ProfileScope,
    ) -> Self {
        let cache = Arc::new(CacheStore::new());
        let rows = Arc::new(rows);
        let bus = Arc::new(EventBus::with_window(config.debounce_window));
        let guard = Arc::new(ScopeGuard::with_strict(
            initial_scope.clone(),
            config.strict_isolation,
        ));
        let engine = Arc::new(ReconcileEngine::with_config(
            cache.clone(),
            rows.clone(),
            remote,
            bus.clone(),
            guard.clone(),
            config.reconcile.clone(),
        ));
        let mutations = MutationCoordinator::new(cache.clone(), rows.clone());

        let layer = Self {
            cache,
            rows,
            bus,
            guard,
            engine,
            mutations,
        };
        layer.wire_routes();
        info!(scope = %initial_scope, "Data layer assembled");
        layer
    }

    /// Install the standing bus handlers: event-to-pattern invalidation
    /// for every debounced topic, and the post-switch replay.
    fn wire_routes(&self) {
        for topic in [
            Topic::MessageSent,
            Topic::WalletMutated,
            Topic::ContactsChanged,
            Topic::KycUpdated,
            Topic::SyncCompleted,
        ] {
            let cache = self.cache.clone();
            self.bus.on(topic, move |topic, payload| {
                for pattern in routes_for(topic, payload) {
                    cache.invalidate(&pattern);
                }
            });
        }

        let engine = self.engine.clone();
        self.bus.on(Topic::ProfileSwitched, move |_, _| {
            engine.drain_queued();
        });
    }

    /// Serve a key locally and reconcile in the background when stale.
    pub fn read(&self, key: &CacheKey) -> ReconcileResult<CacheEntry> {
        self.engine.read(key)
    }

    /// Force one reconciliation pass and wait for it (pull-to-refresh).
    pub async fn refresh(&self, key: &CacheKey) {
        self.engine.reconcile_now(key).await;
    }

    /// Watch keys matching a pattern. The handler fires synchronously
    /// after every write that touches a matching entry.
    pub fn subscribe(
        &self,
        pattern: KeyPattern,
        handler: impl Fn(&CacheKey, &CacheEntry) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.cache.subscribe(pattern, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.cache.unsubscribe(id);
    }

    /// Publish a domain event onto the bus.
    pub fn publish(&self, topic: Topic, payload: EventPayload) {
        self.bus.emit(topic, payload);
    }

    /// Start an optimistic mutation on a timeline key.
    pub fn begin_mutation(
        &self,
        key: &CacheKey,
        tentative: TimelineItem,
    ) -> MutationResult<MutationTicket> {
        self.mutations.begin(key, tentative)
    }

    /// Promote a placeholder to its confirmed item.
    pub fn commit_mutation(&self, temp_id: &str, confirmed: TimelineItem) -> MutationResult<()> {
        self.mutations.commit(temp_id, confirmed)
    }

    /// Undo a failed mutation, restoring the exact pre-mutation state.
    pub fn rollback_mutation(&self, temp_id: &str) {
        self.mutations.rollback(temp_id);
    }

    /// Switch the active account, sweeping foreign-scope entries.
    pub fn switch_profile(&self, scope: ProfileScope) {
        self.guard.sweep_on_switch(scope, &self.cache, &self.bus);
    }

    pub fn active_scope(&self) -> ProfileScope {
        self.guard.capture()
    }

    /// Feed fresh behavioral signals into TTL decisions.
    pub fn set_behavior(&self, behavior: BehaviorSnapshot) {
        self.engine.set_behavior(behavior);
    }

    pub fn behavior(&self) -> BehaviorSnapshot {
        self.engine.behavior()
    }

    /// Whether no reconciliation pass is in flight.
    pub fn is_idle(&self) -> bool {
        self.engine.is_idle()
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn rows(&self) -> &Arc<RowStore> {
        &self.rows
    }
}
