//! Configuration management for filefinder.
//!
//! Supports configuration from:
//! - Command-line arguments (highest priority)
//! - Environment variables
//! - Built-in defaults (lowest priority)

mod settings;

pub use settings::{normalize_root, Config, DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};
