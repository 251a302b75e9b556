//! Prometheus metrics definitions.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Rows currently in the index.
pub static ENTRIES_TOTAL: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("filefinder_entries_total", "Number of indexed entries").unwrap()
});

/// Rows written by reconciliation, by operation.
pub static ENTRY_CHANGES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "filefinder_entry_changes_total",
        "Entries inserted, updated or deleted by sync passes",
        &["op"]
    )
    .unwrap()
});

/// Soft walk errors.
pub static WALK_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "filefinder_walk_errors_total",
        "Paths skipped during walks"
    )
    .unwrap()
});

/// Finished passes, by status.
pub static SYNC_PASSES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "filefinder_sync_passes_total",
        "Finished sync passes",
        &["status"]
    )
    .unwrap()
});

/// Batch commits that had to be retried.
pub static COMMIT_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "filefinder_commit_retries_total",
        "Batch commits retried after a failure"
    )
    .unwrap()
});

/// Pass duration histogram.
pub static SYNC_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "filefinder_sync_duration_seconds",
        "Duration of sync passes in seconds",
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]
    )
    .unwrap()
});

/// Initialize all metrics (call once at startup).
pub fn init_metrics() {
    // Access lazy statics to register them
    let _ = &*ENTRIES_TOTAL;
    let _ = &*ENTRY_CHANGES;
    let _ = &*WALK_ERRORS;
    let _ = &*SYNC_PASSES;
    let _ = &*COMMIT_RETRIES;
    let _ = &*SYNC_DURATION;

    tracing::debug!("Prometheus metrics initialized");
}

/// Render all registered metrics in the text exposition format.
#[must_use]
pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
