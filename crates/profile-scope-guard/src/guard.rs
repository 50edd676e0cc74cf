//! Scope enforcement and the profile-switch sweep.

use crate::{IsolationError, IsolationResult};
use billfold_core::{CacheKey, ProfileScope};
use cache_store::CacheStore;
use invalidation_debounce_router::{EventBus, EventPayload, Topic};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{error, info};

/// Process-wide active account scope, with the switch protocol.
///
/// Reconciliation tasks capture the scope at schedule time via
/// [`ScopeGuard::capture`] and revalidate it with
/// [`ScopeGuard::still_active`] before committing results; anything
/// captured under a stale scope is discarded unapplied.
pub struct ScopeGuard {
    current: RwLock<ProfileScope>,
    switching: AtomicBool,
    /// Strict mode surfaces isolation violations to the caller (fail
    /// fast, development); otherwise they are logged and scoped away.
    strict: bool,
}

impl ScopeGuard {
    /// Build a guard with strictness defaulting to debug builds.
    pub fn new(initial: ProfileScope) -> Self {
        Self::with_strict(initial, cfg!(debug_assertions))
    }

    pub fn with_strict(initial: ProfileScope, strict: bool) -> Self {
        Self {
            current: RwLock::new(initial),
            switching: AtomicBool::new(false),
            strict,
        }
    }

    /// Snapshot the active scope (schedule-time capture).
    pub fn capture(&self) -> ProfileScope {
        self.current.read().expect("lock poisoned").clone()
    }

    /// Whether a scope captured earlier is still the active one and no
    /// switch is in progress (commit-time revalidation).
    pub fn still_active(&self, captured: &ProfileScope) -> bool {
        !self.is_switching() && *self.current.read().expect("lock poisoned") == *captured
    }

    /// Whether a profile switch is currently sweeping.
    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::SeqCst)
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Check a key against the active scope, honoring strictness.
    ///
    /// `Ok(true)` admits the key. `Ok(false)` means the key violates
    /// isolation under a non-strict guard: the violation has been
    /// logged and the caller must treat the key as unserveable. A
    /// strict guard turns the same violation into `Err`.
    pub fn admit(&self, key: &CacheKey) -> IsolationResult<bool> {
        match self.assert_scoped(key) {
            Ok(()) => Ok(true),
            Err(err) if self.strict => Err(err),
            Err(_) => Ok(false),
        }
    }

    /// Check that a key is correctly scoped for the active account,
    /// regardless of strictness.
    ///
    /// Sensitive features must encode the active `(profile, entity)`
    /// pair. Violations are always logged here; [`ScopeGuard::admit`]
    /// decides whether one fails the caller or scopes the key away.
    pub fn assert_scoped(&self, key: &CacheKey) -> IsolationResult<()> {
        if !key.feature.is_sensitive() {
            return Ok(());
        }
        let active = self.capture();
        match &key.scope {
            None => {
                error!(feature = %key.feature, "Isolation violation: sensitive key without scope");
                Err(IsolationError::MissingScope(key.feature))
            }
            Some(scope) if *scope != active => {
                error!(
                    feature = %key.feature,
                    key_scope = %scope,
                    active_scope = %active,
                    "Isolation violation: sensitive key under foreign scope"
                );
                Err(IsolationError::ForeignScope {
                    feature: key.feature,
                    key_scope: scope.to_string(),
                    active_scope: active.to_string(),
                })
            }
            Some(_) => Ok(()),
        }
    }

    /// Switch the active account.
    ///
    /// Raises the `switching` flag, invalidates (without evicting) every
    /// cached entry whose scope is not the new one, installs the new
    /// scope, then announces the switch on the bus so queued
    /// reconciliations can resume. Entries for the new scope are left
    /// untouched and stay instantly readable.
    pub fn sweep_on_switch(
        &self,
        new_scope: ProfileScope,
        cache: &CacheStore,
        bus: &Arc<EventBus>,
    ) {
        let old_scope = self.capture();
        if old_scope == new_scope {
            return;
        }

        self.switching.store(true, Ordering::SeqCst);

        let swept = cache.invalidate_where(|key| {
            key.feature.is_sensitive()
                && key.scope.as_ref() != Some(&new_scope)
        });

        {
            let mut current = self.current.write().expect("lock poisoned");
            *current = new_scope.clone();
        }
        self.switching.store(false, Ordering::SeqCst);

        info!(
            old_scope = %old_scope,
            new_scope = %new_scope,
            swept,
            "Profile switch sweep complete"
        );
        bus.emit(Topic::ProfileSwitched, EventPayload::scoped(new_scope));
    }
}
