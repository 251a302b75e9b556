//! Configured root directories.

use rusqlite::{Connection, OptionalExtension};

use super::db_err;
use super::entries::delete_under;
use super::models::{now_unix, Root};
use crate::Result;

const ROOT_COLUMNS: &str = "id, path, created_at, last_synced_at, last_status";

fn row_to_root(row: &rusqlite::Row<'_>) -> rusqlite::Result<Root> {
    Ok(Root {
        id: row.get(0)?,
        path: row.get(1)?,
        created_at: row.get(2)?,
        last_synced_at: row.get(3)?,
        last_status: row.get(4)?,
    })
}

/// Register a root if needed and return it.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn ensure_root(conn: &Connection, path: &str) -> Result<Root> {
    conn.execute(
        "INSERT OR IGNORE INTO roots (path, created_at) VALUES (?, ?)",
        rusqlite::params![path, now_unix()],
    )
    .map_err(db_err)?;

    conn.query_row(
        &format!("SELECT {ROOT_COLUMNS} FROM roots WHERE path = ?"),
        [path],
        row_to_root,
    )
    .map_err(|e| db_err(e).into())
}

/// Get a root by path.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_root_by_path(conn: &Connection, path: &str) -> Result<Option<Root>> {
    conn.query_row(
        &format!("SELECT {ROOT_COLUMNS} FROM roots WHERE path = ?"),
        [path],
        row_to_root,
    )
    .optional()
    .map_err(|e| db_err(e).into())
}

/// List all roots in registration order.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn list_roots(conn: &Connection) -> Result<Vec<Root>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {ROOT_COLUMNS} FROM roots ORDER BY id"))
        .map_err(db_err)?;

    let roots = stmt
        .query_map([], row_to_root)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;

    Ok(roots)
}

/// Remove a root and every entry discovered under it.
///
/// Returns the number of deleted entries, or `None` if the root was not
/// registered. Run inside a transaction so readers never see a root
/// without its entries or the other way round.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn remove_root(conn: &Connection, path: &str) -> Result<Option<usize>> {
    let Some(root) = get_root_by_path(conn, path)? else {
        return Ok(None);
    };

    let deleted = delete_under(conn, root.id)?;
    conn.execute("DELETE FROM roots WHERE id = ?", [root.id])
        .map_err(db_err)?;

    tracing::info!(root = %root.path, entries = deleted, "Removed root");
    Ok(Some(deleted))
}

/// Remove every stored root whose path is not in `keep`.
///
/// Returns the removed roots.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn prune_roots(conn: &Connection, keep: &[String]) -> Result<Vec<Root>> {
    let stale: Vec<Root> = list_roots(conn)?
        .into_iter()
        .filter(|root| !keep.contains(&root.path))
        .collect();

    for root in &stale {
        remove_root(conn, &root.path)?;
    }

    Ok(stale)
}

/// Record the outcome of a finished pass on the root row.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn record_sync_result(conn: &Connection, root_id: i64, status: &str) -> Result<()> {
    conn.execute(
        "UPDATE roots SET last_synced_at = ?, last_status = ? WHERE id = ?",
        rusqlite::params![now_unix(), status, root_id],
    )
    .map_err(db_err)?;
    Ok(())
}
