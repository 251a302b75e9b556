//! Filtered, sorted, paged reads over the entry table.
//!
//! Filtering and ordering are pushed into SQL. Each sort key matches an
//! index whose last column is `path`, so the order is total and a page is
//! read straight off the index.

use rusqlite::types::Value;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::db_err;
use super::entries::{row_to_entry, ENTRY_COLUMNS};
use super::models::Entry;
use crate::Result;

/// Case-insensitive word filter.
///
/// The text is lower-cased and split on whitespace. A row matches when
/// every word occurs somewhere in its lower-cased full path. An empty
/// filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    words: Vec<String>,
}

impl Filter {
    /// Parse filter text as typed by the user.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self {
            words: text.split_whitespace().map(str::to_lowercase).collect(),
        }
    }

    /// Filter matching everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Lower-cased words that must all match.
    #[must_use]
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Whether the filter matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Same matching rule as the SQL clause, applied to one entry.
    #[must_use]
    pub fn matches(&self, entry: &Entry) -> bool {
        let key = entry.search_key();
        self.words.iter().all(|w| key.contains(w.as_str()))
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        if self.words.is_empty() {
            return (String::new(), Vec::new());
        }

        let clause = self
            .words
            .iter()
            .map(|_| "instr(search_key, ?) > 0")
            .collect::<Vec<_>>()
            .join(" AND ");
        let params = self.words.iter().cloned().map(Value::Text).collect();

        (format!("WHERE {clause}"), params)
    }
}

/// Column to order by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// File name, case-insensitive.
    Name,
    /// Containing directory, then name.
    Directory,
    /// Size in bytes.
    Size,
    /// Modification time.
    Modified,
    /// Full path.
    Path,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    const fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Sort column plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub order: SortOrder,
}

impl Default for SortSpec {
    /// Largest entries first.
    fn default() -> Self {
        Self {
            key: SortKey::Size,
            order: SortOrder::Descending,
        }
    }
}

impl SortSpec {
    /// Create a sort spec.
    #[must_use]
    pub const fn new(key: SortKey, order: SortOrder) -> Self {
        Self { key, order }
    }

    /// `ORDER BY` body. One direction for every column, so the matching
    /// index can be scanned forwards or backwards.
    fn order_clause(self) -> String {
        let dir = self.order.sql();
        match self.key {
            SortKey::Name => format!("name COLLATE NOCASE {dir}, path {dir}"),
            SortKey::Directory => format!(
                "parent_path COLLATE NOCASE {dir}, name COLLATE NOCASE {dir}, path {dir}"
            ),
            SortKey::Size => format!("size {dir}, path {dir}"),
            SortKey::Modified => format!("mtime_ns {dir}, path {dir}"),
            SortKey::Path => format!("path {dir}"),
        }
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Read one page of matching entries.
///
/// Returns at most `limit` rows in `sort` order, skipping the first
/// `offset` matches. Runs as a single statement, so the page comes from one
/// read snapshot even while a sync pass commits batches.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn page(
    conn: &Connection,
    filter: &Filter,
    sort: SortSpec,
    offset: u64,
    limit: u64,
) -> Result<Vec<Entry>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let (where_clause, mut params) = filter.where_clause();
    params.push(Value::Integer(to_sql_int(limit)));
    params.push(Value::Integer(to_sql_int(offset)));

    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM entries {where_clause} ORDER BY {} LIMIT ? OFFSET ?",
        sort.order_clause()
    );

    let mut stmt = conn.prepare_cached(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), row_to_entry)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;

    Ok(rows)
}

/// Count entries matching a filter.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn count(conn: &Connection, filter: &Filter) -> Result<u64> {
    let (where_clause, params) = filter.where_clause();
    let sql = format!("SELECT COUNT(*) FROM entries {where_clause}");

    let mut stmt = conn.prepare_cached(&sql).map_err(db_err)?;
    let n: i64 = stmt
        .query_row(rusqlite::params_from_iter(params), |row| row.get(0))
        .map_err(db_err)?;

    Ok(u64::try_from(n).unwrap_or(0))
}
