//! Shared domain types for the Billfold local-first data layer.
//!
//! This crate holds the model types every other layer agrees on:
//! - [`ProfileScope`] - the (profile, entity) pair that isolates accounts
//! - [`Feature`] / [`CacheKey`] / [`KeyPattern`] - cache addressing and
//!   wildcard invalidation matching
//! - [`Record`] - the normalized row shape persisted by the row store
//! - [`TimelineItem`] - messages and transactions in reverse-chronological
//!   feeds, including optimistic placeholders
//! - [`SyncCursor`] - persisted incremental sync position per stream
//! - [`CacheValue`] - the payload a cache entry carries

mod key;
mod model;
mod scope;

pub use key::{CacheKey, Feature, KeyPattern};
pub use model::{
    CacheValue, Lifecycle, Record, SyncCursor, TimelineItem, TimelineKind,
};
pub use scope::ProfileScope;
