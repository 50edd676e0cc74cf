//! In-memory cache store and staleness policy.
//!
//! The [`CacheStore`] is the single source the UI reads from: a map from
//! [`CacheKey`] to [`CacheEntry`] with synchronous subscriber
//! notification on every write. Invalidation marks entries stale without
//! dropping their data, so the last-known-good value stays visible until
//! the next successful fetch replaces it.
//!
//! The staleness policy ([`StalenessPolicy::ttl`]) is a pure function
//! from data class and a behavior snapshot to a clamped TTL.
//!
//! [`CacheKey`]: billfold_core::CacheKey

mod entry;
mod staleness;
mod store;

pub use entry::{CacheEntry, FetchStatus};
pub use staleness::{
    ActivityLevel, BehaviorSnapshot, DataClass, NetworkQuality, StalenessPolicy,
    TTL_CEILING, TTL_FLOOR,
};
pub use store::{CacheStore, SubscriptionId};
