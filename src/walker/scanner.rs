//! Lazy directory walk producing observed entries.
//!
//! Built on `walkdir`. Symlinks are recorded but not followed unless asked,
//! and a directory whose real location was already entered during the same
//! walk is reported but never descended, so every walk terminates.

use std::collections::HashSet;
use std::path::Path;

use walkdir::{DirEntry, WalkDir};

use super::identity::LocationId;
use crate::error::WalkError;
use crate::storage::{system_time_to_nanos, Entry, EntryKind};

/// Walker options.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOptions {
    /// Descend into symlinked directories.
    pub follow_links: bool,
    /// Stay on the filesystem of the root.
    pub same_file_system: bool,
}

/// One filesystem object seen during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mtime_ns: i64,
}

impl ObservedEntry {
    /// Attach the root id to build a storable entry.
    #[must_use]
    pub fn into_entry(self, root_id: i64) -> Entry {
        Entry::new(self.path, self.kind, self.size, self.mtime_ns, root_id)
    }
}

/// Directory walker.
#[derive(Debug, Clone, Default)]
pub struct Walker {
    options: WalkOptions,
}

impl Walker {
    /// Create a walker.
    #[must_use]
    pub const fn new(options: WalkOptions) -> Self {
        Self { options }
    }

    /// Start a fresh walk under `root`.
    ///
    /// The root itself is not yielded, only its descendants.
    ///
    /// # Errors
    ///
    /// Returns `WalkError::RootUnavailable` if the root is not a readable
    /// directory.
    pub fn walk(&self, root: &Path) -> std::result::Result<Walk, WalkError> {
        let unavailable = |reason: String| WalkError::RootUnavailable {
            path: root.display().to_string(),
            reason,
        };

        let metadata = std::fs::metadata(root).map_err(|e| unavailable(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(unavailable("not a directory".to_string()));
        }
        std::fs::read_dir(root).map_err(|e| unavailable(e.to_string()))?;

        let mut visited = HashSet::new();
        visited.insert(LocationId::of(root, &metadata));

        let inner = WalkDir::new(root)
            .min_depth(1)
            .follow_links(self.options.follow_links)
            .same_file_system(self.options.same_file_system)
            .into_iter();

        tracing::debug!(root = %root.display(), options = ?self.options, "Starting walk");

        Ok(Walk {
            inner,
            visited,
            pending: None,
        })
    }
}

/// Iterator over one walk.
///
/// Yields `Ok` for every observed entry and `Err` for soft failures; the
/// caller decides what to do with the latter.
pub struct Walk {
    inner: walkdir::IntoIter,
    visited: HashSet<LocationId>,
    pending: Option<WalkError>,
}

impl std::fmt::Debug for Walk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Walk")
            .field("visited", &self.visited.len())
            .finish_non_exhaustive()
    }
}

impl Iterator for Walk {
    type Item = std::result::Result<ObservedEntry, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            return Some(Err(err));
        }

        let dent = match self.inner.next()? {
            Ok(dent) => dent,
            Err(e) => {
                let err = map_walkdir_error(&e);
                // A followed link back into an ancestor is still an entry
                if let (WalkError::Cycle { .. }, Some(link)) = (&err, e.path()) {
                    if let Some(observed) = observe_link(link) {
                        self.pending = Some(err);
                        return Some(Ok(observed));
                    }
                }
                return Some(Err(err));
            }
        };

        Some(self.observe(&dent))
    }
}

fn observe_link(path: &Path) -> Option<ObservedEntry> {
    let metadata = std::fs::symlink_metadata(path).ok()?;
    if !metadata.file_type().is_symlink() {
        return None;
    }
    Some(ObservedEntry {
        path: path.to_str()?.to_string(),
        kind: EntryKind::Symlink,
        size: metadata.len(),
        mtime_ns: metadata.modified().map(system_time_to_nanos).unwrap_or(0),
    })
}

impl Walk {
    fn observe(&mut self, dent: &DirEntry) -> std::result::Result<ObservedEntry, WalkError> {
        let is_dir = dent.file_type().is_dir();

        let Some(path) = dent.path().to_str() else {
            if is_dir {
                self.inner.skip_current_dir();
            }
            return Err(WalkError::NonUtf8Path {
                path: dent.path().to_string_lossy().into_owned(),
            });
        };

        let metadata = match dent.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                // Children of an unrecorded directory would be orphans
                if is_dir {
                    self.inner.skip_current_dir();
                }
                return Err(WalkError::Inaccessible {
                    path: path.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        if is_dir && !self.visited.insert(LocationId::of(dent.path(), &metadata)) {
            self.inner.skip_current_dir();
            tracing::debug!(path, "Directory already visited, not descending");
            self.pending = Some(WalkError::Cycle {
                path: path.to_string(),
            });
        }

        let kind = EntryKind::from_file_type(dent.file_type());
        let size = if kind == EntryKind::Directory {
            0
        } else {
            metadata.len()
        };
        let mtime_ns = metadata.modified().map(system_time_to_nanos).unwrap_or(0);

        Ok(ObservedEntry {
            path: path.to_string(),
            kind,
            size,
            mtime_ns,
        })
    }
}

fn map_walkdir_error(e: &walkdir::Error) -> WalkError {
    let path = e
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    if e.loop_ancestor().is_some() {
        return WalkError::Cycle { path };
    }

    let reason = e
        .io_error()
        .map_or_else(|| e.to_string(), ToString::to_string);
    WalkError::Inaccessible { path, reason }
}

/// Counts from a walk without touching the index.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ScanStatsSnapshot {
    pub files: u64,
    pub directories: u64,
    pub symlinks: u64,
    pub total_bytes: u64,
    pub errors: u64,
}

/// Walk a root and count what is found.
///
/// # Errors
///
/// Returns an error if the root cannot be walked.
pub fn scan_root(walker: &Walker, root: &Path) -> crate::Result<ScanStatsSnapshot> {
    let mut stats = ScanStatsSnapshot::default();

    tracing::info!(path = %root.display(), "Starting directory scan");

    for item in walker.walk(root)? {
        match item {
            Ok(entry) => {
                match entry.kind {
                    EntryKind::File => stats.files += 1,
                    EntryKind::Directory => stats.directories += 1,
                    EntryKind::Symlink => stats.symlinks += 1,
                }
                stats.total_bytes = stats.total_bytes.saturating_add(entry.size);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Error walking directory");
                stats.errors += 1;
            }
        }
    }

    tracing::info!(
        path = %root.display(),
        files = stats.files,
        directories = stats.directories,
        symlinks = stats.symlinks,
        errors = stats.errors,
        "Directory scan complete"
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn collect(walker: &Walker, root: &Path) -> (Vec<ObservedEntry>, Vec<WalkError>) {
        let mut ok = Vec::new();
        let mut errs = Vec::new();
        for item in walker.walk(root).unwrap() {
            match item {
                Ok(e) => ok.push(e),
                Err(e) => errs.push(e),
            }
        }
        ok.sort_by(|a, b| a.path.cmp(&b.path));
        (ok, errs)
    }

    #[test]
    fn test_walk_yields_every_entry_once() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::write(tmp.path().join("a/b/one.txt"), "1").unwrap();
        fs::write(tmp.path().join("two.txt"), "22").unwrap();

        let (entries, errs) = collect(&Walker::default(), tmp.path());
        assert!(errs.is_empty());

        let rel: Vec<String> = entries
            .iter()
            .map(|e| {
                Path::new(&e.path)
                    .strip_prefix(tmp.path())
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(rel, ["a", "a/b", "a/b/one.txt", "two.txt"]);

        let two = entries.iter().find(|e| e.path.ends_with("two.txt")).unwrap();
        assert_eq!(two.kind, EntryKind::File);
        assert_eq!(two.size, 2);

        let dir = entries.iter().find(|e| e.path.ends_with("a/b")).unwrap();
        assert_eq!(dir.kind, EntryKind::Directory);
        assert_eq!(dir.size, 0);
    }

    #[test]
    fn test_walk_is_restartable() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("x"), "x").unwrap();

        let walker = Walker::default();
        let first = collect(&walker, tmp.path()).0;
        let second = collect(&walker, tmp.path()).0;
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_root_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let err = Walker::default().walk(&tmp.path().join("gone")).unwrap_err();
        assert!(matches!(err, WalkError::RootUnavailable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_to_ancestor_terminates() {
        let tmp = TempDir::new().unwrap();
        let sub = tmp.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("file"), "f").unwrap();
        std::os::unix::fs::symlink(tmp.path(), sub.join("loop")).unwrap();

        let (entries, _) = collect(&Walker::default(), tmp.path());
        let links: Vec<_> = entries.iter().filter(|e| e.path.ends_with("loop")).collect();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, EntryKind::Symlink);
        assert_eq!(entries.len(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_followed_symlink_loop_is_reported_once() {
        let tmp = TempDir::new().unwrap();
        let sub = tmp.path().join("sub");
        fs::create_dir(&sub).unwrap();
        std::os::unix::fs::symlink(tmp.path(), sub.join("loop")).unwrap();

        let walker = Walker::new(WalkOptions {
            follow_links: true,
            ..Default::default()
        });
        let (entries, errs) = collect(&walker, tmp.path());

        assert!(errs.iter().any(|e| matches!(e, WalkError::Cycle { .. })));
        let loops: Vec<_> = entries.iter().filter(|e| e.path.ends_with("loop")).collect();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].kind, EntryKind::Symlink);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_soft_error() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let locked = tmp.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("hidden"), "h").unwrap();
        fs::write(tmp.path().join("visible"), "v").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Root can read anything; the check is meaningless there
        let readable = fs::read_dir(&locked).is_ok();

        let (entries, errs) = collect(&Walker::default(), tmp.path());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(entries.iter().any(|e| e.path.ends_with("visible")));
        assert!(entries.iter().any(|e| e.path.ends_with("locked")));
        if !readable {
            assert!(!entries.iter().any(|e| e.path.ends_with("hidden")));
            assert!(errs
                .iter()
                .any(|e| matches!(e, WalkError::Inaccessible { .. })));
        }
    }

    #[test]
    fn test_scan_root_counts() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("d")).unwrap();
        fs::write(tmp.path().join("d/f1"), "abc").unwrap();
        fs::write(tmp.path().join("f2"), "de").unwrap();

        let stats = scan_root(&Walker::default(), tmp.path()).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 1);
        assert_eq!(stats.total_bytes, 5);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn test_observed_into_entry() {
        let observed = ObservedEntry {
            path: "/etc/hosts".to_string(),
            kind: EntryKind::File,
            size: 12,
            mtime_ns: 99,
        };
        let entry = observed.into_entry(4);
        assert_eq!(entry.root_id, 4);
        assert_eq!(entry.name, "hosts");
        assert_eq!(entry.parent_path, "/etc");
    }
}
