//! Real-location identity of directories.

use std::fs::Metadata;
use std::path::Path;

/// Identifies where a directory really lives, independent of the path
/// used to reach it. Two paths with the same id are the same directory
/// (bind mount, mount loop, followed link).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocationId {
    /// Device and inode number.
    #[cfg(unix)]
    Inode { dev: u64, ino: u64 },

    /// Canonicalized path where inode numbers are unavailable.
    #[cfg(not(unix))]
    Canonical(std::path::PathBuf),
}

impl LocationId {
    /// Identity of the directory at `path` with the given metadata.
    #[cfg(unix)]
    #[must_use]
    pub fn of(_path: &Path, metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self::Inode {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    /// Identity of the directory at `path` with the given metadata.
    #[cfg(not(unix))]
    #[must_use]
    pub fn of(path: &Path, _metadata: &Metadata) -> Self {
        Self::Canonical(std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_same_directory_same_id() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("d");
        std::fs::create_dir(&dir).unwrap();

        let a = LocationId::of(&dir, &std::fs::metadata(&dir).unwrap());
        let via_dot = dir.join(".");
        let b = LocationId::of(&via_dot, &std::fs::metadata(&via_dot).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_directories_differ() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&b).unwrap();

        assert_ne!(
            LocationId::of(&a, &std::fs::metadata(&a).unwrap()),
            LocationId::of(&b, &std::fs::metadata(&b).unwrap())
        );
    }
}
