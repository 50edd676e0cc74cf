//! Bounded window of resident timeline pages.

use crate::{merge_page, PageDirection};
use billfold_core::TimelineItem;
use chrono::{DateTime, Utc};

/// One fetched page plus the cursor that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePage {
    /// Opaque cursor this page was fetched with (None = first page).
    pub cursor: Option<String>,
    pub items: Vec<TimelineItem>,
    last_accessed: DateTime<Utc>,
}

impl TimelinePage {
    pub fn new(cursor: Option<String>, items: Vec<TimelineItem>) -> Self {
        Self {
            cursor,
            items,
            last_accessed: Utc::now(),
        }
    }
}

/// Keeps at most `max_pages` fetched pages resident.
///
/// When the cap is exceeded the least recently accessed page is evicted
/// first, so the page the user is looking at stays hot while deep
/// scroll-back history is dropped and refetched on demand.
#[derive(Debug)]
pub struct PageWindow {
    pages: Vec<TimelinePage>,
    max_pages: usize,
}

impl PageWindow {
    pub fn new(max_pages: usize) -> Self {
        assert!(max_pages > 0, "page window must hold at least one page");
        Self {
            pages: Vec::new(),
            max_pages,
        }
    }

    /// Insert a page, replacing any resident page with the same cursor.
    pub fn push(&mut self, page: TimelinePage) {
        self.pages.retain(|p| p.cursor != page.cursor);
        self.pages.push(page);
        while self.pages.len() > self.max_pages {
            let (evict_idx, _) = self
                .pages
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| p.last_accessed)
                .expect("window is non-empty");
            self.pages.remove(evict_idx);
        }
    }

    /// Mark a page as recently accessed, keeping it hot.
    pub fn touch(&mut self, cursor: Option<&str>) {
        if let Some(page) = self
            .pages
            .iter_mut()
            .find(|p| p.cursor.as_deref() == cursor)
        {
            page.last_accessed = Utc::now();
        }
    }

    /// Merge all resident pages into one deduplicated, sorted timeline.
    pub fn materialize(&self) -> Vec<TimelineItem> {
        let mut merged: Vec<TimelineItem> = Vec::new();
        for page in &self.pages {
            merged = merge_page(&merged, &page.items, PageDirection::Forward);
        }
        merged
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
