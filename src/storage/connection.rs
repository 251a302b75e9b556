//! `SQLite` database connection management.
//!
//! Provides a connection wrapper with proper configuration for:
//! - WAL mode so readers proceed while a sync batch commits
//! - Serialized access to one connection (via `parking_lot::Mutex`)
//! - A busy timeout for a writer in another process

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::db_err;
use crate::error::StorageError;
use crate::Result;

/// How long a statement waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database connection wrapper.
///
/// Wraps a `SQLite` connection with proper configuration and locking.
/// Clone is cheap - it just clones the Arc. Open a second `Database` on the
/// same file to get an independent connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: String,
}

impl Database {
    /// Open a database at the given path.
    ///
    /// Creates the database file and parent directories if they don't exist.
    /// Configures WAL mode and performance settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or configured.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StorageError::Database(format!("failed to open database: {e}")))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path_str,
        };

        db.configure()?;

        Ok(db)
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StorageError::Database(format!("failed to open in-memory database: {e}"))
        })?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: ":memory:".to_string(),
        };

        db.configure()?;

        Ok(db)
    }

    /// Configure database settings for optimal performance.
    fn configure(&self) -> Result<()> {
        {
            let conn = self.conn.lock();

            conn.busy_timeout(BUSY_TIMEOUT)
                .map_err(|e| StorageError::Database(format!("failed to set busy timeout: {e}")))?;

            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA cache_size = -64000;  -- 64MB cache
                PRAGMA temp_store = MEMORY;  -- pass state stays off disk
                PRAGMA mmap_size = 268435456;  -- 256MB mmap
                PRAGMA foreign_keys = ON;
                ",
            )
            .map_err(|e| StorageError::Database(format!("failed to configure database: {e}")))?;
        }

        tracing::debug!(path = %self.path, "Database configured with WAL mode");

        Ok(())
    }

    /// Execute a function with exclusive database access.
    ///
    /// # Errors
    ///
    /// Returns an error if the function fails.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a function that may modify the database.
    ///
    /// Wraps the operation in an immediate transaction. Readers on other
    /// connections see either none or all of its writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails or if the function fails.
    /// A failed commit is rolled back so the connection stays usable.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();

        conn.execute_batch("BEGIN IMMEDIATE").map_err(db_err)?;

        match f(&conn) {
            Ok(result) => {
                if let Err(e) = conn.execute_batch("COMMIT") {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(db_err(e).into());
                }
                Ok(result)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Get the database path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check if the database is healthy.
    ///
    /// # Errors
    ///
    /// Returns an error if the health check fails.
    pub fn health_check(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| StorageError::Database(format!("health check failed: {e}")).into())
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
