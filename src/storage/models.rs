//! Data models for storage operations.
//!
//! This module defines the core data structures used for:
//! - Indexed filesystem entries
//! - Configured roots
//! - Change-detection state

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Get current Unix timestamp.
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(0))
        .unwrap_or(0)
}

/// Convert a filesystem timestamp to signed nanoseconds since the epoch.
///
/// Times before 1970 come out negative; values outside the `i64` range
/// saturate.
#[must_use]
pub fn system_time_to_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}

/// Kind of filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl EntryKind {
    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "dir",
            Self::Symlink => "link",
        }
    }

    /// Parse the database representation.
    #[must_use]
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "file" => Some(Self::File),
            "dir" => Some(Self::Directory),
            "link" => Some(Self::Symlink),
            _ => None,
        }
    }

    /// Classify a `std::fs::FileType`.
    #[must_use]
    pub fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else {
            Self::File
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One indexed filesystem object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Absolute, normalized path. Unique across the index.
    pub path: String,

    /// Path of the containing directory.
    pub parent_path: String,

    /// Final path segment.
    pub name: String,

    /// File, directory or symlink.
    pub kind: EntryKind,

    /// Size in bytes; 0 for directories.
    pub size: u64,

    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: i64,

    /// Root this entry was discovered under.
    pub root_id: i64,
}

impl Entry {
    /// Create a new entry, deriving `name` and `parent_path` from `path`.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        kind: EntryKind,
        size: u64,
        mtime_ns: i64,
        root_id: i64,
    ) -> Self {
        let path = path.into();
        let (parent_path, name) = split_path(&path);
        let size = if kind == EntryKind::Directory { 0 } else { size };
        Self {
            path,
            parent_path,
            name,
            kind,
            size,
            mtime_ns,
            root_id,
        }
    }

    /// Lower-cased path used for case-insensitive filtering.
    #[must_use]
    pub fn search_key(&self) -> String {
        self.path.to_lowercase()
    }

    /// Modification time as a UTC datetime.
    #[must_use]
    pub fn modified(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.mtime_ns)
    }

    /// Change-detection state of this entry.
    #[must_use]
    pub const fn state(&self) -> EntryState {
        EntryState {
            kind: self.kind,
            size: self.size,
            mtime_ns: self.mtime_ns,
            root_id: self.root_id,
        }
    }
}

fn split_path(path: &str) -> (String, String) {
    let p = Path::new(path);
    let name = p
        .file_name()
        .map_or_else(|| path.to_string(), |n| n.to_string_lossy().into_owned());
    let parent = p
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    (parent, name)
}

/// Stored fields compared during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryState {
    pub kind: EntryKind,
    pub size: u64,
    pub mtime_ns: i64,
    pub root_id: i64,
}

impl EntryState {
    /// Whether the stored row must be rewritten to match `observed`.
    ///
    /// Any timestamp difference counts, including one that moves backwards.
    #[must_use]
    pub fn differs_from(&self, observed: &Self) -> bool {
        self != observed
    }
}

/// A configured root directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    /// Database identifier, referenced by `Entry::root_id`.
    pub id: i64,

    /// Normalized absolute path.
    pub path: String,

    /// Unix timestamp when the root was first registered.
    pub created_at: i64,

    /// Unix timestamp of the last finished pass.
    pub last_synced_at: Option<i64>,

    /// Outcome of the last finished pass.
    pub last_status: Option<String>,
}
