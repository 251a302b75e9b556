//! `SQLite` storage for the file index.
//!
//! This module provides persistent storage for:
//! - Indexed entries keyed by path
//! - Configured roots
//! - Filtered, sorted, paged reads
//! - Per-pass state for incremental reconciliation

mod connection;
mod entries;
mod models;
mod pass_state;
mod query;
mod roots;
mod schema;

use rusqlite::ErrorCode;

use crate::error::StorageError;

pub use connection::Database;
pub use entries::{
    bulk_insert, count_entries, count_for_root, count_under, delete_entry, delete_under, entry_state,
    find_orphans, get_entry, upsert_entry,
};
pub use models::{system_time_to_nanos, Entry, EntryKind, EntryState, Root};
pub use pass_state::{begin_pass, end_pass, mark_seen, mark_seen_under, unseen_paths};
pub use query::{count, page, Filter, SortKey, SortOrder, SortSpec};
pub use roots::{
    ensure_root, get_root_by_path, list_roots, prune_roots, record_sync_result, remove_root,
};
pub use schema::{migrate, verify_schema, SCHEMA_VERSION};

/// The string every stored path below `path` starts with.
pub(crate) fn subtree_prefix(path: &str) -> String {
    let mut prefix = path.trim_end_matches(std::path::MAIN_SEPARATOR).to_string();
    prefix.push(std::path::MAIN_SEPARATOR);
    prefix
}

/// Map a `rusqlite` error, keeping lock contention distinguishable.
pub(crate) fn db_err(e: rusqlite::Error) -> StorageError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            StorageError::Busy(e.to_string())
        }
        _ => StorageError::Database(e.to_string()),
    }
}

/// Initialize storage with migrations.
///
/// # Errors
///
/// Returns an error if database initialization fails.
pub fn init_storage(db: &Database) -> crate::Result<()> {
    db.with_conn(|conn| {
        migrate(conn)?;
        verify_schema(conn)?;

        tracing::info!("Storage initialized, schema version {SCHEMA_VERSION}");
        Ok(())
    })
}
