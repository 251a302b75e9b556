//! Configuration settings and validation.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::{Error, Result};

/// Default number of rows written per transaction.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Upper bound for `batch_size`; larger batches stall readers.
pub const MAX_BATCH_SIZE: usize = 100_000;

/// Main configuration for filefinder.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the `SQLite` index.
    pub data_dir: PathBuf,

    /// Root directories to index, in configured order.
    pub roots: Vec<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Rows per write transaction.
    pub batch_size: usize,

    /// Retries for a failed batch commit before the pass is failed.
    pub max_commit_retries: u32,

    /// Periodic re-sync interval for the background scheduler.
    pub sync_interval: Option<Duration>,

    /// Follow symbolic links while walking.
    pub follow_links: bool,

    /// Do not cross filesystem boundaries below a root.
    pub same_file_system: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            roots: Vec::new(),
            log_level: "info".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_commit_retries: 3,
            sync_interval: None,
            follow_links: false,
            same_file_system: false,
        }
    }
}

impl Config {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration values.
    ///
    /// Roots are normalized before they are checked, so `~/src` and
    /// `/home/me/src/.` are treated as the same directory.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.batch_size == 0 {
            return Err(Error::config("batch_size cannot be 0"));
        }

        if self.batch_size > MAX_BATCH_SIZE {
            return Err(Error::config(format!(
                "batch_size cannot exceed {MAX_BATCH_SIZE}"
            )));
        }

        if matches!(self.sync_interval, Some(interval) if interval.is_zero()) {
            return Err(Error::config("sync_interval cannot be 0"));
        }

        self.normalized_roots()?;

        Ok(())
    }

    /// Validate and require at least one root.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or no root is configured.
    pub fn validate_for_sync(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(Error::config("at least one root directory is required"));
        }
        self.validate()
    }

    /// Normalized roots, checked for existence, duplicates and nesting.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidRoot` for a root that is not an existing
    /// directory and `ConfigError::OverlappingRoots` when one root contains
    /// another.
    pub fn normalized_roots(&self) -> Result<Vec<PathBuf>> {
        let mut roots: Vec<PathBuf> = Vec::with_capacity(self.roots.len());

        for raw in &self.roots {
            let root = normalize_root(raw)?;

            match std::fs::metadata(&root) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(ConfigError::InvalidRoot {
                        path: root.display().to_string(),
                        reason: "not a directory".to_string(),
                    }
                    .into())
                }
                Err(e) => {
                    return Err(ConfigError::InvalidRoot {
                        path: root.display().to_string(),
                        reason: e.to_string(),
                    }
                    .into())
                }
            }

            for existing in &roots {
                let (outer, inner) = if root.starts_with(existing) {
                    (existing, &root)
                } else if existing.starts_with(&root) {
                    (&root, existing)
                } else {
                    continue;
                };
                return Err(ConfigError::OverlappingRoots {
                    outer: outer.display().to_string(),
                    inner: inner.display().to_string(),
                }
                .into());
            }

            roots.push(root);
        }

        Ok(roots)
    }

    /// Get the path to the `SQLite` database file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("filefinder.db")
    }
}

/// Normalize a user-supplied root path.
///
/// Expands a leading `~`, makes the path absolute against the current
/// directory and collapses `.` and `..` lexically. Symlinks are not
/// resolved.
///
/// # Errors
///
/// Returns an error if the path is empty or the current directory is
/// unavailable.
pub fn normalize_root(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::InvalidRoot {
            path: String::new(),
            reason: "empty path".to_string(),
        }
        .into());
    }

    let expanded = expand_home(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    };

    Ok(normalize_lexically(&absolute))
}

fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            match dirs::home_dir() {
                Some(home) => home.join(components.as_path()),
                None => path.to_path_buf(),
            }
        }
        _ => path.to_path_buf(),
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `pop` refuses to remove the root or prefix.
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_root_expands_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(normalize_root(Path::new("~/src/./app")).unwrap(), home.join("src/app"));
        assert_eq!(normalize_root(Path::new("~")).unwrap(), home);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.roots.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_new() {
        let config = Config::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = Config {
            log_level: "invalid".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log level"));
    }

    #[test]
    fn test_log_level_case_insensitive() {
        for level in ["TRACE", "Debug", "INFO", "Warn", "ERROR"] {
            let config = Config {
                log_level: level.to_string(),
                ..Default::default()
            };
            assert!(
                config.validate().is_ok(),
                "Level '{level}' should be valid (case insensitive)"
            );
        }
    }

    #[test]
    fn test_validate_batch_size_bounds() {
        let zero = Config {
            batch_size: 0,
            ..Default::default()
        };
        assert!(zero.validate().unwrap_err().to_string().contains("batch_size"));

        let huge = Config {
            batch_size: MAX_BATCH_SIZE + 1,
            ..Default::default()
        };
        assert!(huge.validate().unwrap_err().to_string().contains("exceed"));
    }

    #[test]
    fn test_validate_zero_interval() {
        let config = Config {
            sync_interval: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_for_sync_requires_roots() {
        let config = Config::default();
        let err = config.validate_for_sync().unwrap_err();
        assert!(err.to_string().contains("root"));
    }

    #[test]
    fn test_missing_root_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            roots: vec![tmp.path().join("does-not-exist")],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_file_root_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();

        let config = Config {
            roots: vec![file],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_nested_roots_rejected() {
        let tmp = TempDir::new().unwrap();
        let inner = tmp.path().join("inner");
        std::fs::create_dir(&inner).unwrap();

        let config = Config {
            roots: vec![inner, tmp.path().to_path_buf()],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::OverlappingRoots { .. })
        ));
    }

    #[test]
    fn test_duplicate_roots_rejected() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            roots: vec![tmp.path().to_path_buf(), tmp.path().join(".")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sibling_roots_accepted() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let ab = tmp.path().join("ab");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&ab).unwrap();

        let config = Config {
            roots: vec![a.clone(), ab.clone()],
            ..Default::default()
        };
        assert_eq!(config.normalized_roots().unwrap(), vec![a, ab]);
    }

    #[test]
    fn test_normalize_root_collapses_dots() {
        let normalized = normalize_root(Path::new("/var/log/../lib/./dpkg")).unwrap();
        assert_eq!(normalized, PathBuf::from("/var/lib/dpkg"));
    }

    #[test]
    fn test_normalize_root_makes_absolute() {
        let normalized = normalize_root(Path::new("some/dir")).unwrap();
        assert!(normalized.is_absolute());
        assert!(normalized.ends_with("some/dir"));
    }

    #[test]
    fn test_normalize_root_rejects_empty() {
        assert!(normalize_root(Path::new("")).is_err());
    }

    #[test]
    fn test_database_path() {
        let config = Config {
            data_dir: PathBuf::from("/var/lib/filefinder"),
            ..Default::default()
        };
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/filefinder/filefinder.db")
        );
    }
}
