//! Tentative entry lifecycle: begin, commit, rollback.

use crate::{MutationError, MutationResult};
use billfold_core::{CacheKey, CacheValue, Lifecycle, Record, TimelineItem};
use cache_store::{CacheEntry, CacheStore};
use local_row_store::RowStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use timeline_cursor_merge::{merge_page, PageDirection};
use tracing::{debug, warn};

/// Handle to an in-flight optimistic mutation.
#[derive(Debug, Clone)]
pub struct MutationTicket {
    pub temp_id: String,
}

struct PendingMutation {
    key: CacheKey,
    /// Exact cache entry before the tentative merge; None if the key was
    /// cold. Rollback restores this verbatim.
    snapshot: Option<CacheEntry>,
    /// Position of the placeholder in the merged timeline at begin time.
    position: usize,
}

/// Coordinates tentative cache entries and their promotion or rollback.
///
/// At most one tentative entry exists per logical mutation; `begin`
/// rejects a temp id that is already pending. Commit writes the
/// confirmed record through to the row store (the coordinator and the
/// reconciliation engine are the only row store writers).
pub struct MutationCoordinator {
    cache: Arc<CacheStore>,
    rows: Arc<RowStore>,
    pending: Mutex<HashMap<String, PendingMutation>>,
}

impl MutationCoordinator {
    pub fn new(cache: Arc<CacheStore>, rows: Arc<RowStore>) -> Self {
        Self {
            cache,
            rows,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Merge a tentative item into the cached timeline for `key`.
    ///
    /// The prior entry is snapshotted for rollback. The item is forced
    /// to `Optimistic` and gets a generated temp id if it carries none.
    pub fn begin(
        &self,
        key: &CacheKey,
        mut tentative: TimelineItem,
    ) -> MutationResult<MutationTicket> {
        let temp_id = tentative
            .temp_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tentative.temp_id = Some(temp_id.clone());
        tentative.lifecycle = Lifecycle::Optimistic;

        let mut pending = self.pending.lock().expect("lock poisoned");
        if pending.contains_key(&temp_id) {
            return Err(MutationError::DuplicateTempId(temp_id));
        }

        let snapshot = self.cache.get(key);
        let existing = match snapshot.as_ref().and_then(|e| e.data.as_ref()) {
            Some(CacheValue::Timeline(items)) => items.clone(),
            Some(CacheValue::Records(_)) => {
                return Err(MutationError::NotTimeline(key.to_string()));
            }
            None => Vec::new(),
        };

        let merged = merge_page(&existing, &[tentative.clone()], PageDirection::Forward);
        let position = merged
            .iter()
            .position(|i| i.id == tentative.id)
            .expect("tentative item present after merge");

        let entry = match &snapshot {
            Some(prior) => CacheEntry {
                data: Some(CacheValue::Timeline(merged)),
                ..prior.clone()
            },
            None => CacheEntry::local_served(CacheValue::Timeline(merged)),
        };
        self.cache.replace(key, entry);

        pending.insert(
            temp_id.clone(),
            PendingMutation {
                key: key.clone(),
                snapshot,
                position,
            },
        );

        debug!(key = %key, temp_id = %temp_id, "Began optimistic mutation");
        Ok(MutationTicket { temp_id })
    }

    /// Replace the placeholder with the confirmed item, in place.
    ///
    /// The placeholder's sort key is kept so the item does not jump
    /// position in sorted views. An unknown temp id indicates a race
    /// (e.g. a reconciliation already confirmed it) and is a logged
    /// no-op, never a user-visible failure.
    pub fn commit(&self, temp_id: &str, mut confirmed: TimelineItem) -> MutationResult<()> {
        let Some(mutation) = self
            .pending
            .lock()
            .expect("lock poisoned")
            .remove(temp_id)
        else {
            warn!(temp_id = %temp_id, "Commit for unknown temp id (already reconciled?), ignoring");
            return Ok(());
        };

        confirmed.lifecycle = Lifecycle::Confirmed;
        confirmed.temp_id = Some(temp_id.to_string());

        let Some(mut entry) = self.cache.get(&mutation.key) else {
            warn!(key = %mutation.key, temp_id = %temp_id, "Commit target entry vanished, ignoring");
            return Ok(());
        };
        let Some(CacheValue::Timeline(mut items)) = entry.data.take() else {
            warn!(key = %mutation.key, temp_id = %temp_id, "Commit target is not a timeline, ignoring");
            return Ok(());
        };

        // O(1) via the position index; fall back to a scan if merges
        // have shifted the collection since begin.
        let position = match items.get(mutation.position) {
            Some(item) if item.temp_id.as_deref() == Some(temp_id) => Some(mutation.position),
            _ => items
                .iter()
                .position(|i| i.temp_id.as_deref() == Some(temp_id) && i.is_optimistic()),
        };
        let Some(position) = position else {
            warn!(key = %mutation.key, temp_id = %temp_id, "Placeholder not found at commit, ignoring");
            return Ok(());
        };

        confirmed.sort_key = items[position].sort_key;
        items[position] = confirmed.clone();

        // Durable write-through of the confirmed record.
        let record = Record {
            id: confirmed.id.clone(),
            payload: serde_json::to_value(&confirmed).map_err(local_row_store::StoreError::from)?,
            updated_at: confirmed.created_at,
        };
        self.rows
            .upsert(mutation.key.feature, mutation.key.scope.as_ref(), &[record])?;

        entry.data = Some(CacheValue::Timeline(items));
        self.cache.replace(&mutation.key, entry);

        debug!(key = %mutation.key, temp_id = %temp_id, id = %confirmed.id, "Committed mutation");
        Ok(())
    }

    /// Restore the exact pre-`begin` state for this mutation.
    pub fn rollback(&self, temp_id: &str) {
        let Some(mutation) = self
            .pending
            .lock()
            .expect("lock poisoned")
            .remove(temp_id)
        else {
            warn!(temp_id = %temp_id, "Rollback for unknown temp id, ignoring");
            return;
        };

        match mutation.snapshot {
            Some(snapshot) => self.cache.replace(&mutation.key, snapshot),
            None => {
                self.cache.remove(&mutation.key);
            }
        }
        debug!(key = %mutation.key, temp_id = %temp_id, "Rolled back mutation");
    }

    /// Number of in-flight mutations (tests and diagnostics).
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billfold_core::{Feature, ProfileScope, TimelineKind};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn scope() -> ProfileScope {
        ProfileScope::new("p1", "e1")
    }

    fn key() -> CacheKey {
        CacheKey::scoped(Feature::Messages, scope()).with_param("conv-1")
    }

    fn item(id: &str, sort_key: i64) -> TimelineItem {
        TimelineItem {
            kind: TimelineKind::Message,
            id: id.to_string(),
            interaction_id: "conv-1".to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000 + sort_key, 0).unwrap(),
            sort_key,
            lifecycle: Lifecycle::Confirmed,
            temp_id: None,
            body: json!({"text": id}),
        }
    }

    fn coordinator() -> MutationCoordinator {
        MutationCoordinator::new(
            Arc::new(CacheStore::new()),
            Arc::new(RowStore::open_in_memory().unwrap()),
        )
    }

    fn seed(coordinator: &MutationCoordinator, items: Vec<TimelineItem>) {
        coordinator.cache.set(
            &key(),
            CacheValue::Timeline(items),
            Duration::seconds(300),
        );
    }

    #[test]
    fn begin_appends_optimistic_placeholder() {
        let coordinator = coordinator();
        seed(&coordinator, vec![item("a", 1)]);

        let tentative = TimelineItem {
            temp_id: Some("tmp-1".to_string()),
            ..item("local-1", 2)
        };
        let ticket = coordinator.begin(&key(), tentative).unwrap();
        assert_eq!(ticket.temp_id, "tmp-1");

        let entry = coordinator.cache.get(&key()).unwrap();
        let items = entry.data.unwrap();
        assert_eq!(items.len(), 2);
        let timeline = items.as_timeline().unwrap();
        assert!(timeline[1].is_optimistic());
    }

    #[test]
    fn begin_generates_temp_id_when_missing() {
        let coordinator = coordinator();
        seed(&coordinator, vec![]);

        let ticket = coordinator.begin(&key(), item("local-1", 1)).unwrap();
        assert!(!ticket.temp_id.is_empty());
        assert_eq!(coordinator.pending_count(), 1);
    }

    #[test]
    fn begin_rejects_duplicate_temp_id() {
        let coordinator = coordinator();
        seed(&coordinator, vec![]);

        let tentative = TimelineItem {
            temp_id: Some("tmp-1".to_string()),
            ..item("local-1", 1)
        };
        coordinator.begin(&key(), tentative.clone()).unwrap();
        let err = coordinator
            .begin(&key(), TimelineItem { id: "local-2".to_string(), ..tentative })
            .unwrap_err();
        assert!(matches!(err, MutationError::DuplicateTempId(_)));
    }

    #[test]
    fn begin_then_rollback_restores_exact_state() {
        let coordinator = coordinator();
        seed(&coordinator, vec![item("a", 1), item("b", 2)]);
        let before = coordinator.cache.get(&key()).unwrap();

        let tentative = TimelineItem {
            temp_id: Some("tmp-1".to_string()),
            ..item("local-1", 3)
        };
        let ticket = coordinator.begin(&key(), tentative).unwrap();
        coordinator.rollback(&ticket.temp_id);

        let after = coordinator.cache.get(&key()).unwrap();
        assert_eq!(before, after);
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn rollback_of_cold_key_removes_entry() {
        let coordinator = coordinator();

        let ticket = coordinator.begin(&key(), item("local-1", 1)).unwrap();
        assert!(coordinator.cache.get(&key()).is_some());

        coordinator.rollback(&ticket.temp_id);
        assert!(coordinator.cache.get(&key()).is_none());
    }

    #[test]
    fn commit_replaces_placeholder_in_place() {
        let coordinator = coordinator();
        seed(&coordinator, vec![item("a", 1), item("c", 10)]);

        let tentative = TimelineItem {
            temp_id: Some("tmp-1".to_string()),
            ..item("local-1", 5)
        };
        let ticket = coordinator.begin(&key(), tentative).unwrap();

        let confirmed = item("srv-1", 999); // server-assigned sort key ignored
        coordinator.commit(&ticket.temp_id, confirmed).unwrap();

        let entry = coordinator.cache.get(&key()).unwrap();
        let data = entry.data.unwrap();
        let timeline = data.as_timeline().unwrap();
        assert_eq!(timeline.len(), 3);
        // Position (middle) and sort key are preserved.
        assert_eq!(timeline[1].id, "srv-1");
        assert_eq!(timeline[1].sort_key, 5);
        assert_eq!(timeline[1].lifecycle, Lifecycle::Confirmed);
        // Exactly one entry for the logical item.
        assert_eq!(
            timeline.iter().filter(|i| i.id == "srv-1").count(),
            1
        );
    }

    #[test]
    fn commit_writes_through_to_row_store() {
        let coordinator = coordinator();
        seed(&coordinator, vec![]);

        let ticket = coordinator.begin(&key(), item("local-1", 1)).unwrap();
        coordinator.commit(&ticket.temp_id, item("srv-1", 1)).unwrap();

        let rows = coordinator
            .rows
            .read(Feature::Messages, Some(&scope()))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "srv-1");
    }

    #[test]
    fn commit_unknown_temp_id_is_noop() {
        let coordinator = coordinator();
        seed(&coordinator, vec![item("a", 1)]);
        let before = coordinator.cache.get(&key()).unwrap();

        coordinator.commit("ghost", item("srv-1", 2)).unwrap();
        assert_eq!(coordinator.cache.get(&key()).unwrap(), before);
    }

    #[test]
    fn rollback_unknown_temp_id_is_noop() {
        let coordinator = coordinator();
        seed(&coordinator, vec![item("a", 1)]);
        coordinator.rollback("ghost");
        assert_eq!(coordinator.cache.get(&key()).unwrap().data.unwrap().len(), 1);
    }

    #[test]
    fn begin_on_record_key_is_rejected() {
        let coordinator = coordinator();
        coordinator.cache.set(
            &key(),
            CacheValue::Records(vec![Record::new("r1", json!({}))]),
            Duration::seconds(300),
        );
        let err = coordinator.begin(&key(), item("local-1", 1)).unwrap_err();
        assert!(matches!(err, MutationError::NotTimeline(_)));
    }

    #[test]
    fn failed_mutation_leaves_no_trace() {
        let coordinator = coordinator();
        seed(&coordinator, vec![item("a", 1)]);
        let before = coordinator.cache.get(&key()).unwrap();
        let rows_before = coordinator
            .rows
            .read(Feature::Messages, Some(&scope()))
            .unwrap();

        let tentative = TimelineItem {
            temp_id: Some("tmp-x".to_string()),
            ..item("local-1", 2)
        };
        let ticket = coordinator.begin(&key(), tentative).unwrap();
        // Simulated network failure: the caller rolls back.
        coordinator.rollback(&ticket.temp_id);

        assert_eq!(coordinator.cache.get(&key()).unwrap(), before);
        assert_eq!(
            coordinator
                .rows
                .read(Feature::Messages, Some(&scope()))
                .unwrap(),
            rows_before
        );
    }
}
