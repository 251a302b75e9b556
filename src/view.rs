//! Windowed read access for a scrolled, filterable list.
//!
//! The view holds no rows and no locks. Every call is answered by the store
//! from the current filter and sort, so a list widget only ever asks for
//! the rows it is about to draw.

use serde::Serialize;

use crate::storage::{count, db_err, page, Database, Entry, Filter, SortKey, SortOrder, SortSpec};
use crate::Result;

/// Filter plus sort, as chosen in the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub filter: Filter,
    pub sort: SortSpec,
}

impl Query {
    /// Query for the given filter text with the default sort.
    #[must_use]
    pub fn new(filter_text: &str) -> Self {
        Self {
            filter: Filter::parse(filter_text),
            sort: SortSpec::default(),
        }
    }

    /// Replace the sort.
    #[must_use]
    pub const fn sorted_by(mut self, key: SortKey, order: SortOrder) -> Self {
        self.sort = SortSpec::new(key, order);
        self
    }
}

/// Rows around the visible part of the list.
#[derive(Debug, Clone, Serialize)]
pub struct Window {
    /// Index of `rows[0]` in the full result.
    pub offset: u64,
    pub rows: Vec<Entry>,
    /// Matching rows in the same snapshot.
    pub total: u64,
}

/// Counts for a status line such as "120/45000".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewStatus {
    pub filtered: u64,
    pub total: u64,
}

/// Read-only cursor over the index.
#[derive(Debug, Clone)]
pub struct QueryView {
    db: Database,
}

impl QueryView {
    /// Create a view reading through `db`.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Number of rows matching the query.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn row_count(&self, query: &Query) -> Result<u64> {
        self.db.with_conn(|conn| count(conn, &query.filter))
    }

    /// Rows `[offset, offset + limit)` of the query result.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn rows_in_range(&self, query: &Query, offset: u64, limit: u64) -> Result<Vec<Entry>> {
        self.db
            .with_conn(|conn| page(conn, &query.filter, query.sort, offset, limit))
    }

    /// Row at `index`, or `None` past the end.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn row_at(&self, query: &Query, index: u64) -> Result<Option<Entry>> {
        Ok(self.rows_in_range(query, index, 1)?.into_iter().next())
    }

    /// The visible rows plus `margin` rows on each side, with the total.
    ///
    /// Count and rows come from one read transaction, so they agree even
    /// while a sync pass is committing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn window(
        &self,
        query: &Query,
        first_visible: u64,
        visible: u64,
        margin: u64,
    ) -> Result<Window> {
        let offset = first_visible.saturating_sub(margin);
        let limit = visible.saturating_add(margin.saturating_mul(2));

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(db_err)?;
            let total = count(&tx, &query.filter)?;
            let rows = page(&tx, &query.filter, query.sort, offset, limit)?;
            tx.finish().map_err(db_err)?;
            Ok(Window {
                offset,
                rows,
                total,
            })
        })
    }

    /// Filtered and total counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn status(&self, query: &Query) -> Result<ViewStatus> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(db_err)?;
            let filtered = count(&tx, &query.filter)?;
            let total = if query.filter.is_empty() {
                filtered
            } else {
                count(&tx, &Filter::all())?
            };
            tx.finish().map_err(db_err)?;
            Ok(ViewStatus { filtered, total })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{bulk_insert, ensure_root, init_storage, EntryKind};

    /// Index with the entries of a small `/etc`.
    fn etc_view() -> QueryView {
        let db = Database::open_in_memory().unwrap();
        init_storage(&db).unwrap();
        db.with_transaction(|conn| {
            let root = ensure_root(conn, "/etc")?;
            let entries = [
                ("/etc/hosts", EntryKind::File, 220, 30),
                ("/etc/passwd", EntryKind::File, 1_800, 10),
                ("/etc/ssh", EntryKind::Directory, 0, 40),
                ("/etc/ssh/sshd_config", EntryKind::File, 3_300, 20),
                ("/etc/ssh/ssh_config", EntryKind::File, 1_600, 50),
            ]
            .map(|(path, kind, size, mtime)| Entry::new(path, kind, size, mtime, root.id));
            bulk_insert(conn, &entries)?;
            Ok(())
        })
        .unwrap();
        QueryView::new(db)
    }

    fn paths(rows: &[Entry]) -> Vec<&str> {
        rows.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_default_sort_is_largest_first() {
        let view = etc_view();
        let rows = view.rows_in_range(&Query::new(""), 0, 2).unwrap();
        assert_eq!(
            paths(&rows),
            ["/etc/ssh/sshd_config", "/etc/passwd"]
        );
    }

    #[test]
    fn test_filter_and_count_agree() {
        let view = etc_view();
        let query = Query::new("SSH config").sorted_by(SortKey::Name, SortOrder::Ascending);

        let total = view.row_count(&query).unwrap();
        let rows = view.rows_in_range(&query, 0, total).unwrap();

        assert_eq!(total, 2);
        assert_eq!(rows.len() as u64, total);
        assert_eq!(paths(&rows), ["/etc/ssh/ssh_config", "/etc/ssh/sshd_config"]);
    }

    #[test]
    fn test_row_at() {
        let view = etc_view();
        let query = Query::new("").sorted_by(SortKey::Path, SortOrder::Ascending);

        let first = view.row_at(&query, 0).unwrap().unwrap();
        assert_eq!(first.path, "/etc/hosts");
        let last = view.row_at(&query, 4).unwrap().unwrap();
        assert_eq!(last.path, "/etc/ssh/sshd_config");
        assert!(view.row_at(&query, 5).unwrap().is_none());
    }

    #[test]
    fn test_window_with_margin() {
        let view = etc_view();
        let query = Query::new("").sorted_by(SortKey::Modified, SortOrder::Ascending);

        let window = view.window(&query, 2, 1, 1).unwrap();
        assert_eq!(window.offset, 1);
        assert_eq!(window.total, 5);
        assert_eq!(
            paths(&window.rows),
            ["/etc/ssh/sshd_config", "/etc/hosts", "/etc/ssh"]
        );

        // Margin clamps at the top
        let window = view.window(&query, 0, 2, 3).unwrap();
        assert_eq!(window.offset, 0);
        assert_eq!(window.rows.len(), 5);
    }

    #[test]
    fn test_status() {
        let view = etc_view();
        let status = view.status(&Query::new("hosts")).unwrap();
        assert_eq!(status, ViewStatus { filtered: 1, total: 5 });

        let status = view.status(&Query::new("")).unwrap();
        assert_eq!(status, ViewStatus { filtered: 5, total: 5 });
    }

    #[test]
    fn test_no_match() {
        let view = etc_view();
        let query = Query::new("nothing-like-this");
        assert_eq!(view.row_count(&query).unwrap(), 0);
        assert!(view.rows_in_range(&query, 0, 10).unwrap().is_empty());
    }
}
