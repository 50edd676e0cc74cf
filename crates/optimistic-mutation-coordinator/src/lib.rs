//! Optimistic mutation coordinator.
//!
//! Mutations (send message, make payment) write a tentative timeline
//! entry into the cache before the network call, then either promote it
//! to the confirmed value or roll the cache back to the exact
//! pre-mutation state. A failed mutation leaves the cache
//! indistinguishable from one where the mutation was never attempted.
//!
//! Commits locate the placeholder through a tempId position index kept
//! alongside the ordered collection, not by scanning.

mod coordinator;
mod error;

pub use coordinator::{MutationCoordinator, MutationTicket};
pub use error::{MutationError, MutationResult};
