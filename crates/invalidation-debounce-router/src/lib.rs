//! Event bus and invalidation router.
//!
//! Domain events (mutation success, sync completion, profile switch) are
//! published on a typed [`Topic`]; a static routing table translates each
//! topic into the [`KeyPattern`]s whose cache entries it dirties. Bursts
//! of events on one topic are coalesced with a trailing debounce: the
//! handlers fire once, after the quiet period, with the most recent
//! payload.
//!
//! [`KeyPattern`]: billfold_core::KeyPattern

mod bus;
mod topic;

pub use bus::{EventBus, HandlerId, DEFAULT_DEBOUNCE_WINDOW};
pub use topic::{routes_for, EventPayload, Topic};
