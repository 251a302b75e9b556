//! Index synchronization.
//!
//! This module provides:
//! - Reconciliation of one root with minimal writes
//! - Bounded batches with commit retry
//! - A background scheduler with request coalescing

mod batch;
mod reconciler;
mod report;
mod scheduler;

pub use reconciler::{Reconciler, SyncOptions};
pub use report::{SyncProgress, SyncReport, SyncStatus, MAX_DIAGNOSTICS};
pub use scheduler::{RequestOutcome, SchedulerConfig, SyncEvent, SyncScheduler};
