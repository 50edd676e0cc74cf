//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::StoreResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_entity_rows(conn)?;
    }
    if current_version < 2 {
        migrate_v2_sync_state(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: Entity rows, keyed by (collection, id, scope).
///
/// Non-sensitive collections store empty strings for the scope columns so
/// the primary key stays total.
fn migrate_v1_entity_rows(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE entity_rows (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            profile_id TEXT NOT NULL DEFAULT '',
            entity_id TEXT NOT NULL DEFAULT '',
            payload TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (collection, id, profile_id, entity_id)
        );
        CREATE INDEX idx_entity_rows_scope
            ON entity_rows (collection, profile_id, entity_id);",
    )?;
    record_migration(conn, 1, "entity_rows")
}

/// V2: Per-(stream, scope) incremental sync state.
fn migrate_v2_sync_state(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE sync_state (
            stream TEXT NOT NULL,
            profile_id TEXT NOT NULL DEFAULT '',
            entity_id TEXT NOT NULL DEFAULT '',
            last_sync_timestamp TEXT,
            next_cursor TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (stream, profile_id, entity_id)
        );",
    )?;
    record_migration(conn, 2, "sync_state")
}
