//! Background sync scheduler.
//!
//! One worker thread runs passes one at a time so the caller's thread stays
//! free for queries. Requests for a root that is already queued are merged;
//! a request for the root being synced schedules a single follow-up pass.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::reconciler::{Reconciler, SyncOptions};
use super::report::{SyncProgress, SyncReport, SyncStatus};
use crate::config::{normalize_root, Config};
use crate::error::SyncError;
use crate::storage::{ensure_root, prune_roots, Database};
use crate::Result;

const EVENT_CAPACITY: usize = 256;

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Normalized roots, in configured order.
    pub roots: Vec<PathBuf>,
    /// Pass tuning.
    pub sync: SyncOptions,
    /// Re-sync every root after this much idle time.
    pub interval: Option<Duration>,
    /// Drop stored roots that are not in `roots` before the first pass.
    pub prune_unconfigured: bool,
}

impl SchedulerConfig {
    /// Build from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured roots are invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            roots: config.normalized_roots()?,
            sync: SyncOptions::from(config),
            interval: config.sync_interval,
            prune_unconfigured: true,
        })
    }
}

/// Result of a sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A new pass was queued.
    Queued,
    /// Merged into a pass that is already queued or running.
    Coalesced,
}

/// Notifications from the worker.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started { root: String },
    Progress(SyncProgress),
    Finished(SyncReport),
}

enum Command {
    Sync(String),
    Shutdown,
}

#[derive(Debug, Default)]
struct Slots {
    queued: HashSet<String>,
    running: Option<String>,
    rerun: bool,
}

struct Shared {
    slots: Mutex<Slots>,
    current: Mutex<Option<CancellationToken>>,
    events: broadcast::Sender<SyncEvent>,
    request_tx: Sender<Command>,
    closed: CancellationToken,
}

impl Shared {
    fn enqueue(&self, root: &str) -> Result<RequestOutcome> {
        if self.closed.is_cancelled() {
            return Err(SyncError::SchedulerClosed.into());
        }
        {
            let mut slots = self.slots.lock();
            if slots.queued.contains(root) {
                return Ok(RequestOutcome::Coalesced);
            }
            if slots.running.as_deref() == Some(root) {
                slots.rerun = true;
                return Ok(RequestOutcome::Coalesced);
            }
            slots.queued.insert(root.to_string());
        }

        if self.request_tx.try_send(Command::Sync(root.to_string())).is_err() {
            self.slots.lock().queued.remove(root);
            return Err(SyncError::SchedulerClosed.into());
        }
        Ok(RequestOutcome::Queued)
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Handle to the background sync worker.
pub struct SyncScheduler {
    shared: Arc<Shared>,
    roots: Vec<String>,
    worker: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    /// Start the worker thread.
    ///
    /// `db` should be a handle of its own; passes keep per-pass state on
    /// its connection.
    ///
    /// # Errors
    ///
    /// Returns an error if a root is not valid UTF-8 or the thread cannot be
    /// spawned.
    pub fn start(db: Database, config: SchedulerConfig) -> Result<Self> {
        let roots = config
            .roots
            .iter()
            .map(|root| root_key(root))
            .collect::<Result<Vec<_>>>()?;

        let (request_tx, request_rx) = bounded(roots.len() + 16);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            slots: Mutex::new(Slots::default()),
            current: Mutex::new(None),
            events,
            request_tx,
            closed: CancellationToken::new(),
        });

        let worker = Worker {
            reconciler: Reconciler::new(db.clone(), config.sync),
            db,
            shared: Arc::clone(&shared),
            roots: roots.clone(),
            interval: config.interval,
            prune_unconfigured: config.prune_unconfigured,
        };

        let handle = std::thread::Builder::new()
            .name("filefinder-sync".to_string())
            .spawn(move || worker.run(&request_rx))
            .map_err(|e| SyncError::Worker(format!("failed to spawn worker: {e}")))?;

        tracing::info!(roots = roots.len(), interval = ?config.interval, "Sync scheduler started");

        Ok(Self {
            shared,
            roots,
            worker: Some(handle),
        })
    }

    /// Request a pass for one configured root.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UnknownRoot` if `root` is not configured, or
    /// `SyncError::SchedulerClosed` if the worker has stopped.
    pub fn request_sync(&self, root: impl AsRef<Path>) -> Result<RequestOutcome> {
        let key = root_key(&normalize_root(root.as_ref())?)?;
        if !self.roots.contains(&key) {
            return Err(SyncError::UnknownRoot { path: key }.into());
        }
        self.shared.enqueue(&key)
    }

    /// Request a pass for every configured root.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::SchedulerClosed` if the worker has stopped.
    pub fn request_sync_all(&self) -> Result<Vec<RequestOutcome>> {
        self.roots
            .iter()
            .map(|root| self.shared.enqueue(root))
            .collect()
    }

    /// Subscribe to pass events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    /// Cancel the running pass, if any. Queued passes still run.
    pub fn cancel_current(&self) {
        if let Some(token) = self.shared.current.lock().as_ref() {
            token.cancel();
        }
    }

    /// Whether nothing is queued or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let slots = self.shared.slots.lock();
        slots.queued.is_empty() && slots.running.is_none()
    }

    /// Configured roots.
    #[must_use]
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Cancel the running pass, stop the worker and wait for it.
    pub fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("Sync worker panicked");
            }
        }
        tracing::info!("Sync scheduler stopped");
    }

    fn stop(&self) {
        self.shared.closed.cancel();
        let _ = self.shared.request_tx.try_send(Command::Shutdown);
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

fn root_key(root: &Path) -> Result<String> {
    root.to_str().map(str::to_string).ok_or_else(|| {
        crate::error::WalkError::NonUtf8Path {
            path: root.display().to_string(),
        }
        .into()
    })
}

struct Worker {
    db: Database,
    reconciler: Reconciler,
    shared: Arc<Shared>,
    roots: Vec<String>,
    interval: Option<Duration>,
    prune_unconfigured: bool,
}

impl Worker {
    fn run(&self, request_rx: &Receiver<Command>) {
        if self.prune_unconfigured {
            match self.db.with_transaction(|conn| prune_roots(conn, &self.roots)) {
                Ok(pruned) => {
                    for root in pruned {
                        tracing::info!(root = %root.path, "Pruned root no longer configured");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to prune roots"),
            }
        }

        loop {
            let command = match self.interval {
                Some(interval) => match request_rx.recv_timeout(interval) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => {
                        tracing::debug!("Sync interval elapsed");
                        for root in &self.roots {
                            if let Err(e) = self.shared.enqueue(root) {
                                tracing::warn!(error = %e, "Failed to queue periodic sync");
                            }
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match request_rx.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };

            match command {
                Command::Sync(root) => {
                    if self.shared.closed.is_cancelled() {
                        break;
                    }
                    self.run_root(&root);
                }
                Command::Shutdown => break,
            }
        }

        self.shared.closed.cancel();
        tracing::debug!("Sync worker shutting down");
    }

    /// Run passes for `root` until no follow-up was requested.
    fn run_root(&self, root: &str) {
        {
            let mut slots = self.shared.slots.lock();
            slots.queued.remove(root);
            slots.running = Some(root.to_string());
            slots.rerun = false;
        }

        loop {
            self.run_pass(root);

            let mut slots = self.shared.slots.lock();
            if slots.rerun && !self.shared.closed.is_cancelled() {
                slots.rerun = false;
                continue;
            }
            slots.running = None;
            slots.rerun = false;
            break;
        }
    }

    fn run_pass(&self, root: &str) {
        let token = self.shared.closed.child_token();
        *self.shared.current.lock() = Some(token.clone());

        self.shared.emit(SyncEvent::Started {
            root: root.to_string(),
        });

        let report = match self.db.with_conn(|conn| ensure_root(conn, root)) {
            Ok(stored) => self.reconciler.reconcile_with_progress(
                &stored,
                &token,
                &mut |progress: &SyncProgress| {
                    self.shared.emit(SyncEvent::Progress(progress.clone()));
                },
            ),
            Err(e) => {
                tracing::error!(root, error = %e, "Failed to start sync pass");
                let mut report = SyncReport::new(root);
                report.status = SyncStatus::Failed(e.to_string());
                report
            }
        };

        *self.shared.current.lock() = None;
        self.shared.emit(SyncEvent::Finished(report));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{count_entries, init_storage, list_roots};
    use std::fs;
    use tempfile::TempDir;

    fn setup(roots: &[&Path], interval: Option<Duration>) -> (Database, SyncScheduler) {
        let db = Database::open_in_memory().unwrap();
        init_storage(&db).unwrap();
        let config = SchedulerConfig {
            roots: roots.iter().map(|r| r.to_path_buf()).collect(),
            sync: SyncOptions {
                retry_backoff: Duration::ZERO,
                ..SyncOptions::default()
            },
            interval,
            prune_unconfigured: true,
        };
        let scheduler = SyncScheduler::start(db.clone(), config).unwrap();
        (db, scheduler)
    }

    fn next_report(rx: &mut broadcast::Receiver<SyncEvent>) -> SyncReport {
        loop {
            match rx.blocking_recv().unwrap() {
                SyncEvent::Finished(report) => return report,
                SyncEvent::Started { .. } | SyncEvent::Progress(_) => {}
            }
        }
    }

    #[test]
    fn test_request_runs_a_pass() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "a").unwrap();
        let (db, scheduler) = setup(&[tmp.path()], None);
        let mut rx = scheduler.subscribe();

        assert_eq!(
            scheduler.request_sync(tmp.path()).unwrap(),
            RequestOutcome::Queued
        );
        let report = next_report(&mut rx);

        assert_eq!(report.status, SyncStatus::Completed);
        assert_eq!(report.inserted, 1);
        assert_eq!(db.with_conn(count_entries).unwrap(), 1);
        scheduler.shutdown();
    }

    #[test]
    fn test_events_in_order() {
        let tmp = TempDir::new().unwrap();
        for i in 0..3 {
            fs::write(tmp.path().join(format!("f{i}")), "x").unwrap();
        }
        let db = Database::open_in_memory().unwrap();
        init_storage(&db).unwrap();
        let config = SchedulerConfig {
            roots: vec![tmp.path().to_path_buf()],
            sync: SyncOptions {
                batch_size: 1,
                ..SyncOptions::default()
            },
            interval: None,
            prune_unconfigured: false,
        };
        let scheduler = SyncScheduler::start(db, config).unwrap();
        let mut rx = scheduler.subscribe();
        scheduler.request_sync(tmp.path()).unwrap();

        assert!(matches!(rx.blocking_recv().unwrap(), SyncEvent::Started { .. }));
        let mut progress = 0;
        loop {
            match rx.blocking_recv().unwrap() {
                SyncEvent::Progress(_) => progress += 1,
                SyncEvent::Finished(report) => {
                    assert_eq!(report.inserted, 3);
                    break;
                }
                SyncEvent::Started { .. } => panic!("unexpected second start"),
            }
        }
        assert_eq!(progress, 3);
        scheduler.shutdown();
    }

    #[test]
    fn test_unknown_root_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let (_db, scheduler) = setup(&[tmp.path()], None);

        let err = scheduler.request_sync(other.path()).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Sync(SyncError::UnknownRoot { .. })
        ));
        scheduler.shutdown();
    }

    #[test]
    fn test_duplicate_requests_coalesce() {
        let tmp = TempDir::new().unwrap();
        let (_db, scheduler) = setup(&[tmp.path()], None);
        let root = root_key(tmp.path()).unwrap();

        // Slots are set by hand so the worker never picks these up
        scheduler.shared.slots.lock().queued.insert(root.clone());
        assert_eq!(
            scheduler.request_sync(tmp.path()).unwrap(),
            RequestOutcome::Coalesced
        );
        scheduler.shared.slots.lock().queued.remove(&root);

        {
            let mut slots = scheduler.shared.slots.lock();
            slots.running = Some(root.clone());
        }
        assert_eq!(
            scheduler.request_sync(tmp.path()).unwrap(),
            RequestOutcome::Coalesced
        );
        assert!(scheduler.shared.slots.lock().rerun);

        {
            let mut slots = scheduler.shared.slots.lock();
            slots.running = None;
            slots.rerun = false;
        }
        scheduler.shutdown();
    }

    #[test]
    fn test_sync_all_reports_each_root() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        fs::write(a.path().join("x"), "x").unwrap();
        fs::write(b.path().join("y"), "y").unwrap();
        let (db, scheduler) = setup(&[a.path(), b.path()], None);
        let mut rx = scheduler.subscribe();

        scheduler.request_sync_all().unwrap();
        let first = next_report(&mut rx);
        let second = next_report(&mut rx);

        let mut roots = vec![first.root, second.root];
        roots.sort();
        let mut expected = vec![root_key(a.path()).unwrap(), root_key(b.path()).unwrap()];
        expected.sort();
        assert_eq!(roots, expected);
        assert_eq!(db.with_conn(count_entries).unwrap(), 2);
        scheduler.shutdown();
    }

    #[test]
    fn test_unconfigured_roots_are_pruned() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        init_storage(&db).unwrap();
        db.with_conn(|conn| ensure_root(conn, "/gone/root")).unwrap();

        let config = SchedulerConfig {
            roots: vec![tmp.path().to_path_buf()],
            sync: SyncOptions::default(),
            interval: None,
            prune_unconfigured: true,
        };
        let scheduler = SyncScheduler::start(db.clone(), config).unwrap();
        let mut rx = scheduler.subscribe();
        scheduler.request_sync(tmp.path()).unwrap();
        next_report(&mut rx);

        let roots = db.with_conn(list_roots).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path, root_key(tmp.path()).unwrap());
        scheduler.shutdown();
    }

    #[test]
    fn test_interval_triggers_passes() {
        let tmp = TempDir::new().unwrap();
        let (_db, scheduler) = setup(&[tmp.path()], Some(Duration::from_millis(20)));
        let mut rx = scheduler.subscribe();

        let report = next_report(&mut rx);
        assert_eq!(report.status, SyncStatus::Completed);
        scheduler.shutdown();
    }

    #[test]
    fn test_request_after_shutdown_fails() {
        let tmp = TempDir::new().unwrap();
        let (_db, scheduler) = setup(&[tmp.path()], None);
        let shared = Arc::clone(&scheduler.shared);
        scheduler.shutdown();

        let err = shared.enqueue(&root_key(tmp.path()).unwrap()).unwrap_err();
        assert!(matches!(err, crate::Error::Sync(SyncError::SchedulerClosed)));
    }
}
