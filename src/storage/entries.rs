//! Entry table operations.
//!
//! All functions take a bare connection; callers decide the transaction
//! boundary with `Database::with_transaction`.

use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};

use super::{db_err, subtree_prefix};
use super::models::{Entry, EntryKind, EntryState};
use crate::error::StorageError;
use crate::Result;

/// Column list shared by every entry query, in `row_to_entry` order.
pub(crate) const ENTRY_COLUMNS: &str = "path, parent_path, name, kind, size, mtime_ns, root_id";

const INSERT_SQL: &str = "INSERT INTO entries \
     (path, parent_path, name, kind, size, mtime_ns, root_id, search_key) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

const UPSERT_SQL: &str = "INSERT INTO entries \
     (path, parent_path, name, kind, size, mtime_ns, root_id, search_key) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
     ON CONFLICT(path) DO UPDATE SET \
         parent_path = excluded.parent_path, \
         name = excluded.name, \
         kind = excluded.kind, \
         size = excluded.size, \
         mtime_ns = excluded.mtime_ns, \
         root_id = excluded.root_id, \
         search_key = excluded.search_key";

fn size_to_db(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn size_from_db(size: i64) -> u64 {
    u64::try_from(size).unwrap_or(0)
}

fn kind_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<EntryKind> {
    let raw: String = row.get(idx)?;
    EntryKind::from_db(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown entry kind '{raw}'").into(),
        )
    })
}

/// Map a row selected with `ENTRY_COLUMNS`.
pub(crate) fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        path: row.get(0)?,
        parent_path: row.get(1)?,
        name: row.get(2)?,
        kind: kind_from_row(row, 3)?,
        size: size_from_db(row.get(4)?),
        mtime_ns: row.get(5)?,
        root_id: row.get(6)?,
    })
}

fn entry_params(entry: &Entry) -> [rusqlite::types::Value; 8] {
    use rusqlite::types::Value;
    [
        Value::Text(entry.path.clone()),
        Value::Text(entry.parent_path.clone()),
        Value::Text(entry.name.clone()),
        Value::Text(entry.kind.as_str().to_string()),
        Value::Integer(size_to_db(entry.size)),
        Value::Integer(entry.mtime_ns),
        Value::Integer(entry.root_id),
        Value::Text(entry.search_key()),
    ]
}

/// Insert many new entries.
///
/// Intended for the first population of a root. Run it inside a
/// transaction: a failure leaves none of the batch behind.
///
/// # Errors
///
/// Returns `StorageError::DuplicateKey` if a path is repeated within the
/// batch or already stored.
pub fn bulk_insert(conn: &Connection, entries: &[Entry]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(INSERT_SQL).map_err(db_err)?;

    for entry in entries {
        stmt.execute(rusqlite::params_from_iter(entry_params(entry)))
            .map_err(|e| match e.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => StorageError::DuplicateKey {
                    path: entry.path.clone(),
                },
                _ => db_err(e),
            })?;
    }

    Ok(entries.len())
}

/// Insert or replace an entry by path.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn upsert_entry(conn: &Connection, entry: &Entry) -> Result<()> {
    conn.prepare_cached(UPSERT_SQL)
        .and_then(|mut stmt| stmt.execute(rusqlite::params_from_iter(entry_params(entry))))
        .map_err(db_err)?;
    Ok(())
}

/// Delete an entry. Returns whether a row existed.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn delete_entry(conn: &Connection, path: &str) -> Result<bool> {
    let deleted = conn
        .prepare_cached("DELETE FROM entries WHERE path = ?")
        .and_then(|mut stmt| stmt.execute([path]))
        .map_err(db_err)?;
    Ok(deleted > 0)
}

/// Delete every entry discovered under a root.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn delete_under(conn: &Connection, root_id: i64) -> Result<usize> {
    conn.execute("DELETE FROM entries WHERE root_id = ?", [root_id])
        .map_err(|e| db_err(e).into())
}

/// Get an entry by path.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_entry(conn: &Connection, path: &str) -> Result<Option<Entry>> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE path = ?"),
        [path],
        row_to_entry,
    )
    .optional()
    .map_err(|e| db_err(e).into())
}

/// Stored change-detection state for a path.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn entry_state(conn: &Connection, path: &str) -> Result<Option<EntryState>> {
    let mut stmt = conn
        .prepare_cached("SELECT kind, size, mtime_ns, root_id FROM entries WHERE path = ?")
        .map_err(db_err)?;

    stmt.query_row([path], |row| {
        Ok(EntryState {
            kind: kind_from_row(row, 0)?,
            size: size_from_db(row.get(1)?),
            mtime_ns: row.get(2)?,
            root_id: row.get(3)?,
        })
    })
    .optional()
    .map_err(|e| db_err(e).into())
}

/// Count all entries.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn count_entries(conn: &Connection) -> Result<u64> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
        .map_err(db_err)?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Count entries belonging to a root.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn count_for_root(conn: &Connection, root_id: i64) -> Result<u64> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM entries WHERE root_id = ?",
            [root_id],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Count entries stored at or below `path`, whichever root owns them.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn count_under(conn: &Connection, path: &str) -> Result<u64> {
    let count: i64 = conn
        .prepare_cached(
            "SELECT COUNT(*) FROM entries
             WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2",
        )
        .map_err(db_err)?
        .query_row(rusqlite::params![path, subtree_prefix(path)], |row| row.get(0))
        .map_err(db_err)?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Entries whose parent directory is neither stored nor a configured root.
///
/// Empty after every completed pass.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn find_orphans(conn: &Connection, limit: usize) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT e.path FROM entries e
             WHERE NOT EXISTS (SELECT 1 FROM entries p WHERE p.path = e.parent_path)
               AND NOT EXISTS (SELECT 1 FROM roots r WHERE r.path = e.parent_path)
             ORDER BY e.path
             LIMIT ?",
        )
        .map_err(db_err)?;

    let paths = stmt
        .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| row.get(0))
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;

    Ok(paths)
}
