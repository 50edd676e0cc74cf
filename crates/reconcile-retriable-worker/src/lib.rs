//! Background reconciliation engine.
//!
//! Reads serve whatever the cache or row store holds, instantly; a stale
//! entry additionally schedules a background pass that pulls the remote
//! delta, applies it to the row store (deletions before upserts), and
//! replaces the cache entry. At most one pass is in flight per cache key;
//! concurrent stale reads coalesce onto it. Failed passes keep the
//! last-known-good value and cursor and retry with exponential backoff.

mod engine;
mod error;
mod http;
mod remote;

pub use engine::{ReconcileConfig, ReconcileEngine};
pub use error::{FetchError, ReconcileError, ReconcileResult};
pub use http::HttpRemoteSource;
pub use remote::{RemoteSource, SyncDelta};
