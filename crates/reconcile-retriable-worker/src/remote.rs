//! Remote source abstraction.

use crate::FetchError;
use billfold_core::{Feature, ProfileScope, Record, SyncCursor};
use futures_util::future::BoxFuture;

/// One incremental sync response for a stream.
///
/// `deletions` are applied before `upserts`; an id appearing in both is
/// gone after the pass. `sync_timestamp` is the server's new high-water
/// mark and `next_cursor`, when present, means the backlog is not yet
/// drained and another page should be pulled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncDelta {
    pub upserts: Vec<Record>,
    pub deletions: Vec<String>,
    pub next_cursor: Option<String>,
    pub sync_timestamp: String,
}

/// A source of incremental deltas, one stream per feature.
///
/// Implementations must be cancel-safe: the engine drops the future
/// without applying anything when a pass is abandoned.
pub trait RemoteSource: Send + Sync {
    fn fetch(
        &self,
        stream: Feature,
        cursor: SyncCursor,
        scope: Option<ProfileScope>,
    ) -> BoxFuture<'_, Result<SyncDelta, FetchError>>;
}
