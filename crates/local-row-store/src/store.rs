//! Row store connection and query operations.

use crate::{migrations, StoreError, StoreResult};
use billfold_core::{Feature, ProfileScope, Record, SyncCursor};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// SQLite row store wrapper.
///
/// The connection is guarded by a mutex so the store can be shared across
/// background reconciliation tasks. Every operation is a single bounded
/// statement; nothing here performs network I/O.
pub struct RowStore {
    conn: Mutex<Connection>,
}

impl RowStore {
    /// Open a store at the given path, running migrations if needed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store for testing.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Resolve the scope columns for a collection access.
    ///
    /// Sensitive collections require a scope; non-sensitive ones store
    /// empty scope columns regardless of what the caller passes.
    fn scope_columns(
        feature: Feature,
        scope: Option<&ProfileScope>,
    ) -> StoreResult<(String, String)> {
        if !feature.is_sensitive() {
            return Ok((String::new(), String::new()));
        }
        match scope {
            Some(scope) => Ok((scope.profile_id.clone(), scope.entity_id.clone())),
            None => Err(StoreError::UnscopedSensitive(feature)),
        }
    }

    /// Read all rows in a collection for one scope, oldest update first.
    pub fn read(
        &self,
        feature: Feature,
        scope: Option<&ProfileScope>,
    ) -> StoreResult<Vec<Record>> {
        let (profile_id, entity_id) = Self::scope_columns(feature, scope)?;
        let conn = self.conn.lock().expect("lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, payload, updated_at FROM entity_rows
             WHERE collection = ?1 AND profile_id = ?2 AND entity_id = ?3
             ORDER BY updated_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(
            params![feature.as_str(), profile_id, entity_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )?;

        let mut records = Vec::new();
        for row in rows {
            let (id, payload, updated_at) = row?;
            records.push(Record {
                id,
                payload: serde_json::from_str(&payload)?,
                updated_at: parse_timestamp(&updated_at)?,
            });
        }
        Ok(records)
    }

    /// Insert or replace rows in a collection.
    pub fn upsert(
        &self,
        feature: Feature,
        scope: Option<&ProfileScope>,
        records: &[Record],
    ) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let (profile_id, entity_id) = Self::scope_columns(feature, scope)?;
        let mut conn = self.conn.lock().expect("lock poisoned");
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO entity_rows (collection, id, profile_id, entity_id, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (collection, id, profile_id, entity_id)
                 DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
            )?;
            for record in records {
                stmt.execute(params![
                    feature.as_str(),
                    record.id,
                    profile_id,
                    entity_id,
                    serde_json::to_string(&record.payload)?,
                    record.updated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        debug!(collection = %feature, count = records.len(), "Upserted rows");
        Ok(())
    }

    /// Delete rows by id. Returns the number of rows removed.
    pub fn delete(
        &self,
        feature: Feature,
        scope: Option<&ProfileScope>,
        ids: &[String],
    ) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let (profile_id, entity_id) = Self::scope_columns(feature, scope)?;
        let mut conn = self.conn.lock().expect("lock poisoned");
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare(
                "DELETE FROM entity_rows
                 WHERE collection = ?1 AND id = ?2 AND profile_id = ?3 AND entity_id = ?4",
            )?;
            for id in ids {
                removed += stmt.execute(params![feature.as_str(), id, profile_id, entity_id])?;
            }
        }
        tx.commit()?;
        debug!(collection = %feature, requested = ids.len(), removed, "Deleted rows");
        Ok(removed)
    }

    /// Load the persisted sync cursor for a stream, if any.
    pub fn get_cursor(
        &self,
        stream: Feature,
        scope: Option<&ProfileScope>,
    ) -> StoreResult<Option<SyncCursor>> {
        let (profile_id, entity_id) = Self::scope_columns(stream, scope)?;
        let conn = self.conn.lock().expect("lock poisoned");
        let cursor = conn
            .query_row(
                "SELECT last_sync_timestamp, next_cursor FROM sync_state
                 WHERE stream = ?1 AND profile_id = ?2 AND entity_id = ?3",
                params![stream.cursor_key(), profile_id, entity_id],
                |row| {
                    Ok(SyncCursor {
                        last_sync_timestamp: row.get(0)?,
                        next_cursor: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(cursor)
    }

    /// Persist the sync cursor for a stream.
    ///
    /// Written after every successful reconciliation pass; never written
    /// on failure so a crash resumes from the last good position.
    pub fn put_cursor(
        &self,
        stream: Feature,
        scope: Option<&ProfileScope>,
        cursor: &SyncCursor,
    ) -> StoreResult<()> {
        let (profile_id, entity_id) = Self::scope_columns(stream, scope)?;
        let conn = self.conn.lock().expect("lock poisoned");
        conn.execute(
            "INSERT INTO sync_state (stream, profile_id, entity_id, last_sync_timestamp, next_cursor, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (stream, profile_id, entity_id)
             DO UPDATE SET last_sync_timestamp = excluded.last_sync_timestamp,
                           next_cursor = excluded.next_cursor,
                           updated_at = excluded.updated_at",
            params![
                stream.cursor_key(),
                profile_id,
                entity_id,
                cursor.last_sync_timestamp,
                cursor.next_cursor,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("bad timestamp '{raw}': {e}")))
}
