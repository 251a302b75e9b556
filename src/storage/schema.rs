//! Database schema definitions and migrations.
//!
//! Provides versioned schema migrations for safe database upgrades.

use rusqlite::Connection;

use crate::error::StorageError;
use crate::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Run all pending migrations.
///
/// # Errors
///
/// Returns an error if migrations fail.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| StorageError::Migration(format!("failed to create migrations table: {e}")))?;

    let current_version = get_current_version(conn)?;
    tracing::info!(
        current = current_version,
        target = SCHEMA_VERSION,
        "Checking database migrations"
    );

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_current_version(conn: &Connection) -> Result<i32> {
    let result = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(version) => Ok(version),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(StorageError::Migration(format!("failed to get version: {e}")).into()),
    }
}

/// Record a migration as applied.
fn record_migration(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)",
        rusqlite::params![version, super::models::now_unix()],
    )
    .map_err(|e| StorageError::Migration(format!("failed to record migration: {e}")))?;

    Ok(())
}

/// Migration v1: roots and entries.
///
/// Every sort key has an index ending in `path`, which makes the ordering
/// total and lets `LIMIT`/`OFFSET` walk the index instead of sorting.
fn migrate_v1(conn: &Connection) -> Result<()> {
    tracing::info!("Applying migration v1: Initial schema");

    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS roots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            last_synced_at INTEGER,
            last_status TEXT
        );

        CREATE TABLE IF NOT EXISTS entries (
            path TEXT PRIMARY KEY,
            parent_path TEXT NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            size INTEGER NOT NULL,
            mtime_ns INTEGER NOT NULL,
            root_id INTEGER NOT NULL REFERENCES roots(id),
            search_key TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_entries_root ON entries(root_id, path);
        CREATE INDEX IF NOT EXISTS idx_entries_name ON entries(name COLLATE NOCASE, path);
        CREATE INDEX IF NOT EXISTS idx_entries_parent
            ON entries(parent_path COLLATE NOCASE, name COLLATE NOCASE, path);
        CREATE INDEX IF NOT EXISTS idx_entries_size ON entries(size, path);
        CREATE INDEX IF NOT EXISTS idx_entries_mtime ON entries(mtime_ns, path);
        ",
    )
    .map_err(|e| StorageError::Migration(format!("v1 migration failed: {e}")))?;

    record_migration(conn, 1)?;
    tracing::info!("Migration v1 complete");

    Ok(())
}

/// Verify all expected tables exist.
///
/// # Errors
///
/// Returns an error if any expected table is missing from the schema.
pub fn verify_schema(conn: &Connection) -> Result<()> {
    let tables = ["roots", "entries"];

    for table in tables {
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?",
                [table],
                |_| Ok(true),
            )
            .unwrap_or(false);

        if !exists {
            return Err(StorageError::Migration(format!("table '{table}' not found")).into());
        }
    }

    tracing::debug!("Schema verification passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_migrate_empty_database() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            migrate(conn)?;
            verify_schema(conn)?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_migrate_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            migrate(conn)?;
            migrate(conn)?;
            verify_schema(conn)?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_schema_version_tracking() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            migrate(conn)?;
            assert_eq!(get_current_version(conn)?, SCHEMA_VERSION);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_verify_fails_without_migration() {
        let db = Database::open_in_memory().unwrap();
        let result = db.with_conn(verify_schema);
        assert!(result.is_err());
    }

    #[test]
    fn test_entry_path_is_unique() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            migrate(conn)?;

            conn.execute(
                "INSERT INTO roots (path, created_at) VALUES ('/etc', 0)",
                [],
            )
            .unwrap();

            let insert = "INSERT INTO entries \
                 (path, parent_path, name, kind, size, mtime_ns, root_id, search_key)
                 VALUES ('/etc/a.conf', '/etc', 'a.conf', 'file', 1, 1, 1, '/etc/a.conf')";

            conn.execute(insert, []).unwrap();
            assert!(conn.execute(insert, []).is_err());

            Ok(())
        })
        .unwrap();
    }
}
