//! Isolation guard error types.

use billfold_core::Feature;
use thiserror::Error;

/// Isolation violation: a programming error, not a runtime condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IsolationError {
    /// A sensitive feature key carried no account scope at all.
    #[error("sensitive feature '{0}' addressed without a profile scope")]
    MissingScope(Feature),

    /// A sensitive feature key carried a scope other than the active one.
    #[error("sensitive feature '{feature}' addressed with scope {key_scope}, active scope is {active_scope}")]
    ForeignScope {
        feature: Feature,
        key_scope: String,
        active_scope: String,
    },
}

/// Result type alias using IsolationError.
pub type IsolationResult<T> = Result<T, IsolationError>;
