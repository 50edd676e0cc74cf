//! Cursor-based timeline pagination and merge.
//!
//! Feeds (messages, transactions) arrive as cursor-delimited pages from
//! the remote source and as optimistic placeholders from local
//! mutations. This crate owns the merge discipline:
//! - items dedup by `id`; a page merged twice is a no-op
//! - a confirmed item supersedes the optimistic placeholder sharing its
//!   `temp_id` correlation key
//! - the merged result is sorted ascending by `sort_key`
//! - date-group separators are derived from the merged items, never
//!   stored, so re-merging cannot duplicate them
//! - a bounded [`PageWindow`] caps how many fetched pages stay resident
//!
//! Cursors are opaque tokens minted by the remote source; nothing here
//! ever derives one from item data.

mod merge;
mod window;

pub use merge::{derive_day_separators, merge_page, DaySeparator, PageDirection};
pub use window::{PageWindow, TimelinePage};
