//! Reconciliation of one root against the index.
//!
//! A pass walks the root once and compares every observed entry with its
//! stored state. Only differences are written, in bounded batches, each
//! batch its own transaction. Once the walk is complete, stored rows of the
//! root that were not observed are deleted, again in bounded batches.
//!
//! The deletion phase only runs after a full, uncancelled walk: an
//! interrupted pass can leave stale rows behind but never drops a row for
//! a path that still exists.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::batch::{commit_with_retry, Batch};
use super::report::{SyncProgress, SyncReport, SyncStatus};
use crate::config::{normalize_root, Config};
use crate::error::WalkError;
use crate::storage::{
    begin_pass, count_entries, count_for_root, count_under, delete_entry, end_pass, ensure_root,
    entry_state, mark_seen_under, record_sync_result, unseen_paths, Database, Root,
};
use crate::telemetry::{metrics, spans};
use crate::walker::{WalkOptions, Walker};
use crate::{Error, Result};

/// Tuning for a reconciliation pass.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Rows per write transaction.
    pub batch_size: usize,
    /// Extra attempts for a failed batch commit.
    pub max_commit_retries: u32,
    /// Base delay between commit attempts; grows linearly.
    pub retry_backoff: Duration,
    /// Walker behavior.
    pub walk: WalkOptions,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
            max_commit_retries: 3,
            retry_backoff: Duration::from_millis(100),
            walk: WalkOptions::default(),
        }
    }
}

impl From<&Config> for SyncOptions {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            max_commit_retries: config.max_commit_retries,
            walk: WalkOptions {
                follow_links: config.follow_links,
                same_file_system: config.same_file_system,
            },
            ..Self::default()
        }
    }
}

/// Brings the stored entries of a root in line with the filesystem.
#[derive(Debug, Clone)]
pub struct Reconciler {
    db: Database,
    walker: Walker,
    options: SyncOptions,
}

impl Reconciler {
    /// Create a reconciler writing through `db`.
    ///
    /// Passes use a temporary table on `db`'s connection, so only one pass
    /// may run on a given `Database` at a time.
    #[must_use]
    pub fn new(db: Database, options: SyncOptions) -> Self {
        Self {
            db,
            walker: Walker::new(options.walk),
            options,
        }
    }

    /// Register `path` as a root if needed and reconcile it.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be normalized or the root cannot
    /// be registered. Failures during the pass are reported in the returned
    /// report instead.
    pub fn sync_path(&self, path: &Path, cancel: &CancellationToken) -> Result<SyncReport> {
        let root_path = normalize_root(path)?;
        let root_str = root_path
            .to_str()
            .ok_or_else(|| WalkError::NonUtf8Path {
                path: root_path.display().to_string(),
            })?
            .to_string();

        let root = self.db.with_conn(|conn| ensure_root(conn, &root_str))?;
        Ok(self.reconcile(&root, cancel))
    }

    /// Reconcile a root, registering it first (async version).
    ///
    /// Runs the pass on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be registered or the task panics.
    pub async fn sync_path_async(
        self: Arc<Self>,
        path: impl AsRef<Path> + Send + 'static,
        cancel: CancellationToken,
    ) -> Result<SyncReport> {
        tokio::task::spawn_blocking(move || self.sync_path(path.as_ref(), &cancel))
            .await
            .map_err(|e| Error::internal(format!("sync task failed: {e}")))?
    }

    /// Run one pass over `root`.
    #[must_use]
    pub fn reconcile(&self, root: &Root, cancel: &CancellationToken) -> SyncReport {
        self.reconcile_with_progress(root, cancel, &mut |_: &SyncProgress| {})
    }

    /// Run one pass over `root`, calling `on_progress` after each batch.
    pub fn reconcile_with_progress(
        &self,
        root: &Root,
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(&SyncProgress),
    ) -> SyncReport {
        let mut report = SyncReport::new(&root.path);
        let span = spans::sync_pass_span(&report.pass_id.to_string(), &root.path);
        let _guard = span.enter();

        let start = Instant::now();
        tracing::info!("Sync pass started");

        report.status = match self.run_pass(root, cancel, &mut report, on_progress) {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(error = %e, "Sync pass failed");
                SyncStatus::Failed(e.to_string())
            }
        };

        if let Err(e) = self.db.with_conn(end_pass) {
            tracing::debug!(error = %e, "Failed to drop pass state");
        }

        let elapsed = start.elapsed();
        report.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.finish(root, &report, elapsed);

        report
    }

    fn run_pass(
        &self,
        root: &Root,
        cancel: &CancellationToken,
        report: &mut SyncReport,
        on_progress: &mut dyn FnMut(&SyncProgress),
    ) -> Result<SyncStatus> {
        let walk = self.walker.walk(Path::new(&root.path))?;

        // A root with nothing stored below it is populated with plain inserts
        // and has nothing to delete. Rows left there by another root are
        // taken over one by one.
        let (stored, under) = self.db.with_conn(|conn| {
            Ok((count_for_root(conn, root.id)?, count_under(conn, &root.path)?))
        })?;
        let initial = under == 0;
        if !initial {
            self.db.with_conn(begin_pass)?;
        }
        tracing::debug!(stored, under, initial, "Walking root");

        let mut batch = Batch::new(self.options.batch_size);
        let mut unreadable = Vec::new();

        for item in walk {
            let observed = match item {
                Ok(observed) => observed,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping path");
                    metrics::WALK_ERRORS.inc();
                    report.record_skip(&e);
                    if matches!(e, WalkError::Inaccessible { .. }) && !e.path().is_empty() {
                        unreadable.push(e.path().to_string());
                    }
                    continue;
                }
            };
            report.observed += 1;

            let entry = observed.into_entry(root.id);
            if initial {
                batch.insert(entry);
            } else {
                let previous = self.db.with_conn(|conn| entry_state(conn, &entry.path))?;
                batch.see(entry.path.clone());
                match previous {
                    None => batch.insert(entry),
                    Some(state) if state.differs_from(&entry.state()) => batch.update(entry),
                    Some(_) => report.unchanged += 1,
                }
            }

            if batch.is_full() {
                if cancel.is_cancelled() {
                    tracing::info!("Sync pass cancelled during walk");
                    return Ok(SyncStatus::Cancelled);
                }
                self.flush(&mut batch, initial, report)?;
                on_progress(&report.progress());
            }
        }

        if cancel.is_cancelled() {
            tracing::info!("Sync pass cancelled before final batch");
            return Ok(SyncStatus::Cancelled);
        }
        if !batch.is_empty() {
            self.flush(&mut batch, initial, report)?;
            on_progress(&report.progress());
        }

        if !initial {
            if !unreadable.is_empty() {
                self.keep_unreadable(&unreadable)?;
            }
            if let Some(status) = self.delete_unseen(root, cancel, report, on_progress)? {
                return Ok(status);
            }
        }

        Ok(SyncStatus::Completed)
    }

    fn flush(&self, batch: &mut Batch, initial: bool, report: &mut SyncReport) -> Result<()> {
        let applied = commit_with_retry(
            &self.db,
            "apply",
            self.options.batch_size,
            self.options.max_commit_retries,
            self.options.retry_backoff,
            |conn| batch.apply(conn, initial),
        )?;
        batch.clear();

        report.inserted += applied.inserted;
        report.updated += applied.updated;
        metrics::ENTRY_CHANGES
            .with_label_values(&["insert"])
            .inc_by(applied.inserted);
        metrics::ENTRY_CHANGES
            .with_label_values(&["update"])
            .inc_by(applied.updated);

        Ok(())
    }

    /// Keep the stored rows under paths the walk could not read.
    ///
    /// Paths that no longer exist are left unseen so the deletion phase
    /// removes them.
    fn keep_unreadable(&self, paths: &[String]) -> Result<()> {
        let paths: Vec<&String> = paths
            .iter()
            .filter(|path| !path.is_empty() && still_present(Path::new(path)))
            .collect();
        if paths.is_empty() {
            return Ok(());
        }

        let kept = commit_with_retry(
            &self.db,
            "keep",
            paths.len(),
            self.options.max_commit_retries,
            self.options.retry_backoff,
            |conn| {
                let mut kept = 0;
                for path in &paths {
                    kept += mark_seen_under(conn, path)?;
                }
                Ok(kept)
            },
        )?;
        tracing::debug!(kept, "Kept rows under unreadable paths");
        Ok(())
    }

    /// Delete rows of `root` not observed this pass.
    ///
    /// Returns `Some(Cancelled)` if stopped early.
    fn delete_unseen(
        &self,
        root: &Root,
        cancel: &CancellationToken,
        report: &mut SyncReport,
        on_progress: &mut dyn FnMut(&SyncProgress),
    ) -> Result<Option<SyncStatus>> {
        let limit = self.options.batch_size.max(1);

        loop {
            if cancel.is_cancelled() {
                tracing::info!("Sync pass cancelled during deletion");
                return Ok(Some(SyncStatus::Cancelled));
            }

            let stale = self
                .db
                .with_conn(|conn| unseen_paths(conn, root.id, limit))?;
            if stale.is_empty() {
                return Ok(None);
            }

            let deleted = commit_with_retry(
                &self.db,
                "delete",
                stale.len(),
                self.options.max_commit_retries,
                self.options.retry_backoff,
                |conn| {
                    let mut deleted = 0u64;
                    for path in &stale {
                        if delete_entry(conn, path)? {
                            deleted += 1;
                        }
                    }
                    Ok(deleted)
                },
            )?;

            report.deleted += deleted;
            metrics::ENTRY_CHANGES
                .with_label_values(&["delete"])
                .inc_by(deleted);
            on_progress(&report.progress());

            if stale.len() < limit {
                return Ok(None);
            }
        }
    }

    fn finish(&self, root: &Root, report: &SyncReport, elapsed: Duration) {
        if let Err(e) = self
            .db
            .with_conn(|conn| record_sync_result(conn, root.id, report.status.as_str()))
        {
            tracing::warn!(error = %e, "Failed to record sync result");
        }

        metrics::SYNC_PASSES
            .with_label_values(&[report.status.as_str()])
            .inc();
        metrics::SYNC_DURATION.observe(elapsed.as_secs_f64());
        if let Ok(total) = self.db.with_conn(count_entries) {
            metrics::ENTRIES_TOTAL.set(i64::try_from(total).unwrap_or(i64::MAX));
        }

        if report.skipped > 0 {
            tracing::warn!(skipped = report.skipped, "Some paths were skipped");
        }

        tracing::info!(
            status = report.status.as_str(),
            observed = report.observed,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            unchanged = report.unchanged,
            elapsed_ms = report.elapsed_ms,
            "Sync pass finished"
        );
    }
}

fn still_present(path: &Path) -> bool {
    !matches!(std::fs::symlink_metadata(path), Err(e) if e.kind() == ErrorKind::NotFound)
}
