//! Per-pass bookkeeping for incremental reconciliation.
//!
//! The paths observed during a pass live in a `TEMP` table, which is private
//! to the writer's connection and never touches the index file. After the
//! walk, stored rows of the root that are missing from it are stale.

use rusqlite::Connection;

use super::{db_err, subtree_prefix};
use crate::Result;

/// Create (or empty) the observed-paths table for a new pass.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn begin_pass(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TEMP TABLE IF NOT EXISTS sync_seen (path TEXT PRIMARY KEY) WITHOUT ROWID;
         DELETE FROM temp.sync_seen;",
    )
    .map_err(db_err)?;
    Ok(())
}

/// Record observed paths.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn mark_seen<'a>(conn: &Connection, paths: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut stmt = conn
        .prepare_cached("INSERT OR IGNORE INTO temp.sync_seen (path) VALUES (?)")
        .map_err(db_err)?;

    for path in paths {
        stmt.execute([path]).map_err(db_err)?;
    }

    Ok(())
}

/// Up to `limit` stored paths of a root that were not observed this pass.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn unseen_paths(conn: &Connection, root_id: i64, limit: usize) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT e.path FROM entries e
             WHERE e.root_id = ?1
               AND NOT EXISTS (SELECT 1 FROM temp.sync_seen s WHERE s.path = e.path)
             ORDER BY e.path
             LIMIT ?2",
        )
        .map_err(db_err)?;

    let paths = stmt
        .query_map(
            rusqlite::params![root_id, i64::try_from(limit).unwrap_or(i64::MAX)],
            |row| row.get(0),
        )
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;

    Ok(paths)
}

/// Mark `path` and every stored row below it as observed.
///
/// Used for directories the walk could not read, so their stored contents
/// survive the deletion phase. An empty path marks nothing.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn mark_seen_under(conn: &Connection, path: &str) -> Result<usize> {
    if path.is_empty() {
        return Ok(0);
    }
    let prefix = subtree_prefix(path);
    let marked = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO temp.sync_seen (path)
             SELECT path FROM entries
             WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2",
        )
        .map_err(db_err)?
        .execute(rusqlite::params![path, prefix])
        .map_err(db_err)?;
    Ok(marked)
}

/// Drop the observed-paths table.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn end_pass(conn: &Connection) -> Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS temp.sync_seen")
        .map_err(db_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ensure_root, migrate, upsert_entry, Database, Entry, EntryKind};

    #[test]
    fn test_unseen_paths_excludes_observed() {
        let db = Database::open_in_memory().unwrap();

        db.with_conn(|conn| {
            migrate(conn)?;
            let root = ensure_root(conn, "/etc")?;
            let other = ensure_root(conn, "/var")?;
            for path in ["/etc/a", "/etc/b", "/etc/c"] {
                upsert_entry(conn, &Entry::new(path, EntryKind::File, 1, 1, root.id))?;
            }
            upsert_entry(conn, &Entry::new("/var/x", EntryKind::File, 1, 1, other.id))?;

            begin_pass(conn)?;
            mark_seen(conn, ["/etc/b"])?;

            assert_eq!(unseen_paths(conn, root.id, 10)?, ["/etc/a", "/etc/c"]);
            assert_eq!(unseen_paths(conn, root.id, 1)?, ["/etc/a"]);

            // A new pass starts from an empty set
            begin_pass(conn)?;
            assert_eq!(unseen_paths(conn, root.id, 10)?.len(), 3);

            end_pass(conn)?;
            Ok(())
        })
        .unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_mark_seen_under_protects_subtree() {
        let db = Database::open_in_memory().unwrap();

        db.with_conn(|conn| {
            migrate(conn)?;
            let root = ensure_root(conn, "/srv")?;
            for path in ["/srv/locked", "/srv/locked/a", "/srv/locked/b/c", "/srv/lockedx", "/srv/z"] {
                upsert_entry(conn, &Entry::new(path, EntryKind::File, 1, 1, root.id))?;
            }

            begin_pass(conn)?;
            assert_eq!(mark_seen_under(conn, "/srv/locked")?, 3);
            assert_eq!(unseen_paths(conn, root.id, 10)?, ["/srv/lockedx", "/srv/z"]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_mark_seen_under_empty_path_marks_nothing() {
        let db = Database::open_in_memory().unwrap();

        db.with_conn(|conn| {
            migrate(conn)?;
            let root = ensure_root(conn, "/srv")?;
            for path in ["/srv/a", "/srv/b"] {
                upsert_entry(conn, &Entry::new(path, EntryKind::File, 1, 1, root.id))?;
            }

            begin_pass(conn)?;
            assert_eq!(mark_seen_under(conn, "")?, 0);
            assert_eq!(unseen_paths(conn, root.id, 10)?, ["/srv/a", "/srv/b"]);
            Ok(())
        })
        .unwrap();
    }
}
