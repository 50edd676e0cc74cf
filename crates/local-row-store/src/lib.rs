//! SQLite-backed row store for the Billfold data layer.
//!
//! This crate is the durable owner of entity rows. The cache is a derived,
//! rebuildable projection of what lives here. It provides:
//! - Scoped row CRUD per feature collection
//! - Versioned schema migrations
//! - Persisted per-(stream, scope) sync cursors so incremental sync
//!   resumes across restarts
//!
//! Sensitive collections must always be accessed with a [`ProfileScope`];
//! unscoped access to them is rejected rather than silently served.
//!
//! [`ProfileScope`]: billfold_core::ProfileScope

mod error;
mod migrations;
mod store;

pub use error::{StoreError, StoreResult};
pub use migrations::run_migrations;
pub use store::RowStore;
