//! Page merge and dedup rules.

use billfold_core::{Lifecycle, TimelineItem};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Which end of the feed a page extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    /// Newer items (tail of the feed).
    Forward,
    /// Older items (head of the feed, e.g. scroll-back).
    Backward,
}

/// Merge a fetched page into an existing materialized timeline.
///
/// Items merge by `id`. A confirmed item whose `temp_id` matches an
/// optimistic placeholder replaces that placeholder even when their ids
/// differ. When the same id appears on both sides, the confirmed side
/// wins; two confirmed copies resolve to the incoming one. The result is
/// sorted ascending by `sort_key` (ties break on id), so merging is
/// insensitive to `direction` and idempotent.
pub fn merge_page(
    existing: &[TimelineItem],
    page: &[TimelineItem],
    _direction: PageDirection,
) -> Vec<TimelineItem> {
    // Index the current items by id, and optimistic placeholders by
    // their correlation key.
    let mut by_id: HashMap<String, TimelineItem> = HashMap::with_capacity(existing.len());
    let mut optimistic_by_temp: HashMap<String, String> = HashMap::new();
    for item in existing {
        if item.is_optimistic() {
            if let Some(temp_id) = &item.temp_id {
                optimistic_by_temp.insert(temp_id.clone(), item.id.clone());
            }
        }
        by_id.insert(item.id.clone(), item.clone());
    }

    for incoming in page {
        // A confirmed item supersedes the placeholder it confirms.
        if incoming.lifecycle == Lifecycle::Confirmed {
            if let Some(temp_id) = &incoming.temp_id {
                if let Some(placeholder_id) = optimistic_by_temp.remove(temp_id) {
                    if placeholder_id != incoming.id {
                        by_id.remove(&placeholder_id);
                    }
                }
            }
        }

        match by_id.get(&incoming.id) {
            // Never let an optimistic copy clobber a confirmed one.
            Some(current)
                if current.lifecycle == Lifecycle::Confirmed
                    && incoming.is_optimistic() => {}
            _ => {
                if incoming.is_optimistic() {
                    if let Some(temp_id) = &incoming.temp_id {
                        optimistic_by_temp.insert(temp_id.clone(), incoming.id.clone());
                    }
                }
                by_id.insert(incoming.id.clone(), incoming.clone());
            }
        }
    }

    let mut merged: Vec<TimelineItem> = by_id.into_values().collect();
    merged.sort_by(|a, b| a.sort_key.cmp(&b.sort_key).then_with(|| a.id.cmp(&b.id)));
    merged
}

/// A derived date-group boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySeparator {
    pub date: NaiveDate,
    /// Id of the first item in that day's group.
    pub first_item_id: String,
}

/// Derive date-group separators from a sorted timeline.
///
/// Separators are computed, never stored alongside items, so repeated
/// merges can never duplicate them.
pub fn derive_day_separators(items: &[TimelineItem]) -> Vec<DaySeparator> {
    let mut separators = Vec::new();
    let mut current_day: Option<NaiveDate> = None;
    for item in items {
        let day = item.created_at.date_naive();
        if current_day != Some(day) {
            separators.push(DaySeparator {
                date: day,
                first_item_id: item.id.clone(),
            });
            current_day = Some(day);
        }
    }
    separators
}

#[cfg(test)]
mod tests {
    use super::*;
    use billfold_core::TimelineKind;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn item(id: &str, sort_key: i64) -> TimelineItem {
        TimelineItem {
            kind: TimelineKind::Message,
            id: id.to_string(),
            interaction_id: "conv-1".to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000 + sort_key, 0).unwrap(),
            sort_key,
            lifecycle: Lifecycle::Confirmed,
            temp_id: None,
            body: json!({}),
        }
    }

    fn optimistic(id: &str, temp_id: &str, sort_key: i64) -> TimelineItem {
        TimelineItem {
            lifecycle: Lifecycle::Optimistic,
            temp_id: Some(temp_id.to_string()),
            ..item(id, sort_key)
        }
    }

    #[test]
    fn merge_dedups_by_id() {
        let existing = vec![item("a", 1), item("b", 2)];
        let page = vec![item("b", 2), item("c", 3)];
        let merged = merge_page(&existing, &page, PageDirection::Forward);
        let ids: Vec<_> = merged.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let existing = vec![item("a", 1), item("b", 2)];
        let page = vec![item("c", 3)];
        let once = merge_page(&existing, &page, PageDirection::Forward);
        let twice = merge_page(&once, &page, PageDirection::Forward);
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_sorts_ascending_by_sort_key() {
        let existing = vec![item("c", 30)];
        let page = vec![item("a", 10), item("b", 20)];
        let merged = merge_page(&existing, &page, PageDirection::Backward);
        let keys: Vec<_> = merged.iter().map(|i| i.sort_key).collect();
        assert_eq!(keys, vec![10, 20, 30]);
    }

    #[test]
    fn confirmed_supersedes_optimistic_by_temp_id() {
        // The placeholder has a client-minted id; the confirmed item
        // arrives under the server id but echoes the temp id.
        let existing = vec![optimistic("local-1", "tmp-x", 5)];
        let confirmed = TimelineItem {
            temp_id: Some("tmp-x".to_string()),
            ..item("srv-9", 5)
        };
        let merged = merge_page(&existing, &[confirmed], PageDirection::Forward);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "srv-9");
        assert_eq!(merged[0].lifecycle, Lifecycle::Confirmed);
    }

    #[test]
    fn optimistic_never_clobbers_confirmed_same_id() {
        let existing = vec![item("a", 1)];
        let page = vec![optimistic("a", "tmp-1", 1)];
        let merged = merge_page(&existing, &page, PageDirection::Forward);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].lifecycle, Lifecycle::Confirmed);
    }

    #[test]
    fn optimistic_items_survive_unrelated_pages() {
        let existing = vec![optimistic("local-1", "tmp-x", 100)];
        let page = vec![item("a", 1), item("b", 2)];
        let merged = merge_page(&existing, &page, PageDirection::Forward);
        assert_eq!(merged.len(), 3);
        assert!(merged.iter().any(|i| i.id == "local-1" && i.is_optimistic()));
    }

    #[test]
    fn exactly_one_item_per_logical_id_after_confirmation() {
        // Server echoes the placeholder under the same id.
        let existing = vec![optimistic("m-1", "tmp-1", 7)];
        let confirmed = TimelineItem {
            temp_id: Some("tmp-1".to_string()),
            ..item("m-1", 7)
        };
        let merged = merge_page(&existing, &[confirmed], PageDirection::Forward);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].lifecycle, Lifecycle::Confirmed);
    }

    #[test]
    fn separators_one_per_day_in_order() {
        let d1 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let d2 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let items = vec![
            TimelineItem {
                created_at: d1,
                ..item("a", 1)
            },
            TimelineItem {
                created_at: d1,
                ..item("b", 2)
            },
            TimelineItem {
                created_at: d2,
                ..item("c", 3)
            },
        ];

        let separators = derive_day_separators(&items);
        assert_eq!(separators.len(), 2);
        assert_eq!(separators[0].first_item_id, "a");
        assert_eq!(separators[1].first_item_id, "c");
    }

    #[test]
    fn separators_do_not_duplicate_after_remerge() {
        let items = vec![item("a", 1), item("b", 2)];
        let merged = merge_page(&items, &items.clone(), PageDirection::Forward);
        let separators = derive_day_separators(&merged);
        assert_eq!(separators.len(), derive_day_separators(&items).len());
    }
}
