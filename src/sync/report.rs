//! Pass results and progress.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::WalkError;

/// Number of skip messages kept verbatim in a report.
pub const MAX_DIAGNOSTICS: usize = 100;

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum SyncStatus {
    /// Walk and deletions finished; the root mirrors the walk.
    Completed,
    /// Stopped at a batch boundary on request.
    Cancelled,
    /// Stopped by an error; earlier batches stay committed.
    Failed(String),
}

impl SyncStatus {
    /// Short label stored on the root row and used as a metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub pass_id: Uuid,
    pub root: String,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: SyncStatus,
    pub observed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub diagnostics: Vec<String>,
    pub elapsed_ms: u64,
}

impl SyncReport {
    pub(crate) fn new(root: &str) -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            root: root.to_string(),
            started_at: Utc::now(),
            status: SyncStatus::Completed,
            observed: 0,
            inserted: 0,
            updated: 0,
            deleted: 0,
            unchanged: 0,
            skipped: 0,
            diagnostics: Vec::new(),
            elapsed_ms: 0,
        }
    }

    /// Count a skipped path, keeping the first few messages.
    pub(crate) fn record_skip(&mut self, err: &WalkError) {
        self.skipped += 1;
        if self.diagnostics.len() < MAX_DIAGNOSTICS {
            self.diagnostics.push(err.to_string());
        }
    }

    /// Whether the pass wrote anything.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.inserted + self.updated + self.deleted > 0
    }

    /// Progress snapshot.
    #[must_use]
    pub fn progress(&self) -> SyncProgress {
        SyncProgress {
            root: self.root.clone(),
            observed: self.observed,
            inserted: self.inserted,
            updated: self.updated,
            deleted: self.deleted,
        }
    }
}

/// Running totals, emitted after every committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub root: String,
    pub observed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_are_capped() {
        let mut report = SyncReport::new("/data");
        for i in 0..(MAX_DIAGNOSTICS + 5) {
            report.record_skip(&WalkError::Cycle {
                path: format!("/data/{i}"),
            });
        }
        assert_eq!(report.skipped, (MAX_DIAGNOSTICS + 5) as u64);
        assert_eq!(report.diagnostics.len(), MAX_DIAGNOSTICS);
    }

    #[test]
    fn test_report_serializes_status_inline() {
        let mut report = SyncReport::new("/data");
        report.status = SyncStatus::Failed("disk full".to_string());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "disk full");
        assert_eq!(json["root"], "/data");
    }

    #[test]
    fn test_changed() {
        let mut report = SyncReport::new("/data");
        assert!(!report.changed());
        report.deleted = 1;
        assert!(report.changed());
    }
}
