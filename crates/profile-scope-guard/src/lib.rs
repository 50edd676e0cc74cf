//! Profile/entity isolation guard.
//!
//! Guarantees that cached data for one account is never served to a
//! session operating under a different account:
//! - every sensitive cache key must encode the active
//!   [`ProfileScope`](billfold_core::ProfileScope); violations fail fast
//!   in strict (development) mode and are scoped away with an error log
//!   in production
//! - on profile switch, every cached entry under the old scope is
//!   invalidated (not evicted) and a transient `switching` window keeps
//!   new reconciliations queued until the sweep completes, so a slow
//!   fetch for the previous account can never commit into the new one

mod error;
mod guard;

pub use error::{IsolationError, IsolationResult};
pub use guard::ScopeGuard;
