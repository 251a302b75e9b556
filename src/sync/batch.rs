//! Bounded write batches and commit retry.

use std::time::Duration;

use rusqlite::Connection;

use crate::storage::{bulk_insert, mark_seen, upsert_entry, Database, Entry};
use crate::telemetry::{metrics, spans};
use crate::Result;

/// Pending writes for one transaction.
#[derive(Debug)]
pub(crate) struct Batch {
    capacity: usize,
    inserts: Vec<Entry>,
    updates: Vec<Entry>,
    seen: Vec<String>,
}

/// Rows written by one committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Applied {
    pub inserted: u64,
    pub updated: u64,
}

impl Batch {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inserts: Vec::new(),
            updates: Vec::new(),
            seen: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, entry: Entry) {
        self.inserts.push(entry);
    }

    pub(crate) fn update(&mut self, entry: Entry) {
        self.updates.push(entry);
    }

    /// Record a path as observed this pass.
    pub(crate) fn see(&mut self, path: String) {
        self.seen.push(path);
    }

    fn len(&self) -> usize {
        self.seen.len().max(self.inserts.len() + self.updates.len())
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the batch inside the caller's transaction.
    ///
    /// With `bulk` set the inserts go through multi-row `INSERT`s, which is
    /// only valid while the root has no stored rows. Otherwise every change
    /// is an upsert and observed paths are marked for the deletion phase.
    pub(crate) fn apply(&self, conn: &Connection, bulk: bool) -> Result<Applied> {
        let mut applied = Applied::default();

        if bulk {
            applied.inserted = bulk_insert(conn, &self.inserts)? as u64;
        } else {
            for entry in &self.inserts {
                upsert_entry(conn, entry)?;
            }
            applied.inserted = self.inserts.len() as u64;
        }

        for entry in &self.updates {
            upsert_entry(conn, entry)?;
        }
        applied.updated = self.updates.len() as u64;

        if !bulk {
            mark_seen(conn, self.seen.iter().map(String::as_str))?;
        }

        Ok(applied)
    }

    pub(crate) fn clear(&mut self) {
        self.inserts.clear();
        self.updates.clear();
        self.seen.clear();
    }
}

/// Run `f` in a transaction, retrying retryable failures.
///
/// Attempt `n` waits `backoff * n` before running. Every attempt rolls back
/// completely on failure, so a retry never sees half a batch.
///
/// # Errors
///
/// Returns the last error once `retries` extra attempts are used up, or the
/// first non-retryable error.
pub(crate) fn commit_with_retry<T, F>(
    db: &Database,
    phase: &'static str,
    rows: usize,
    retries: u32,
    backoff: Duration,
    mut f: F,
) -> Result<T>
where
    F: FnMut(&Connection) -> Result<T>,
{
    let span = spans::batch_span(phase, rows);
    let _guard = span.enter();

    let mut attempt = 0u32;
    loop {
        match db.with_transaction(&mut f) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                metrics::COMMIT_RETRIES.inc();
                tracing::warn!(error = %e, attempt, retries, "Batch commit failed, retrying");
                std::thread::sleep(backoff * attempt);
            }
            Err(e) => return Err(e),
        }
    }
}
