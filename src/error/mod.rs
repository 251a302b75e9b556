//! Error types and Result aliases for filefinder.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.

use thiserror::Error;

/// Result type alias using filefinder's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for filefinder operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database/storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Directory walking error.
    #[error("walk error: {0}")]
    Walk(#[from] WalkError),

    /// Sync scheduling error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Configuration errors, raised before any walk starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configured root cannot be indexed.
    #[error("invalid root '{path}': {reason}")]
    InvalidRoot { path: String, reason: String },

    /// Two configured roots contain one another.
    #[error("root '{inner}' is nested inside root '{outer}'")]
    OverlappingRoots { outer: String, inner: String },

    /// Any other invalid setting.
    #[error("{0}")]
    Invalid(String),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// `SQLite` database error.
    #[error("database error: {0}")]
    Database(String),

    /// Database is locked by another writer.
    #[error("database busy: {0}")]
    Busy(String),

    /// A bulk insert supplied a path that already exists.
    #[error("duplicate entry path '{path}'")]
    DuplicateKey { path: String },

    /// Record not found.
    #[error("not found: {entity} with id '{id}'")]
    NotFound { entity: &'static str, id: String },

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

/// Directory walk errors.
///
/// All variants except `RootUnavailable` are soft: the walk continues and
/// the error ends up in the pass diagnostics.
#[derive(Error, Debug, Clone)]
pub enum WalkError {
    /// Path could not be read (permissions, deleted mid-walk).
    #[error("cannot access '{path}': {reason}")]
    Inaccessible { path: String, reason: String },

    /// Directory resolves to a location already entered during this walk.
    #[error("directory loop detected at '{path}'")]
    Cycle { path: String },

    /// Path is not valid UTF-8 and cannot be used as an index key.
    #[error("path is not valid UTF-8: '{path}'")]
    NonUtf8Path { path: String },

    /// The root itself cannot be walked.
    #[error("root '{path}' unavailable: {reason}")]
    RootUnavailable { path: String, reason: String },
}

/// Background sync errors.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The scheduler worker has stopped.
    #[error("sync scheduler is not running")]
    SchedulerClosed,

    /// Sync requested for a path that is not a configured root.
    #[error("'{path}' is not a configured root")]
    UnknownRoot { path: String },

    /// Worker thread failure.
    #[error("sync worker error: {0}")]
    Worker(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether retrying the failed operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage(StorageError::Busy(_) | StorageError::Database(_)) | Self::Io(_)
        )
    }
}

impl StorageError {
    /// Create a not-found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl WalkError {
    /// Path the error refers to.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Inaccessible { path, .. }
            | Self::Cycle { path }
            | Self::NonUtf8Path { path }
            | Self::RootUnavailable { path, .. } => path,
        }
    }
}
