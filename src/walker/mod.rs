//! Filesystem walking.
//!
//! This module provides:
//! - A lazy, restartable walk over one root
//! - Real-location tracking so loops are never re-entered
//! - Soft per-path diagnostics instead of hard failures

mod identity;
mod scanner;

pub use identity::LocationId;
pub use scanner::{scan_root, ObservedEntry, ScanStatsSnapshot, Walk, WalkOptions, Walker};
