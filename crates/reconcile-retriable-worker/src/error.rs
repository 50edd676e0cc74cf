//! Reconciliation error types.

use thiserror::Error;

/// Why a remote fetch failed.
///
/// Both variants take the same recovery path: the cached value and the
/// sync cursor are left untouched and the pass is retried with backoff.
/// A malformed response never advances the cursor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("malformed sync payload: {0}")]
    Parse(String),
}

/// Reconciliation error type.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] local_row_store::StoreError),

    #[error(transparent)]
    Isolation(#[from] profile_scope_guard::IsolationError),
}

/// Result type alias using ReconcileError.
pub type ReconcileResult<T> = Result<T, ReconcileError>;
