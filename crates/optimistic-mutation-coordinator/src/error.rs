//! Mutation coordinator error types.

use thiserror::Error;

/// Mutation coordinator error type.
#[derive(Error, Debug)]
pub enum MutationError {
    /// The target key holds a record set, not a timeline.
    #[error("cache key '{0}' does not hold a timeline")]
    NotTimeline(String),

    /// A tentative entry with this temp id is already pending.
    #[error("mutation '{0}' already has a tentative entry")]
    DuplicateTempId(String),

    /// Row store write-through failure on commit.
    #[error(transparent)]
    Store(#[from] local_row_store::StoreError),
}

/// Result type alias using MutationError.
pub type MutationResult<T> = Result<T, MutationError>;
