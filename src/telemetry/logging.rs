//! Structured logging and tracing configuration.
//!
//! Provides setup for observability using the `tracing` crate with:
//! - Structured logging with JSON output option
//! - Configurable log levels, overridable through `RUST_LOG`
//! - Spans around sync passes

use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry,
};

/// Initialize tracing.
///
/// Sets up the tracing subscriber with:
/// - Level from `RUST_LOG` if set, otherwise `level`
/// - Plain text or JSON output
///
/// # Panics
///
/// Panics if tracing subscriber has already been initialized in this process.
pub fn init_tracing(level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let json_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr);

        Registry::default().with(env_filter).with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_writer(std::io::stderr);

        Registry::default().with(env_filter).with(fmt_layer).init();
    }

    tracing::debug!("Tracing initialized: level={}, json={}", level, json);
}

/// Spans shared across the sync engine.
pub mod spans {
    use tracing::{info_span, Span};

    /// Span covering one reconciliation pass.
    #[must_use]
    pub fn sync_pass_span(pass_id: &str, root: &str) -> Span {
        info_span!("sync_pass", pass_id = %pass_id, root = %root)
    }

    /// Span covering one batch commit.
    #[must_use]
    pub fn batch_span(phase: &'static str, rows: usize) -> Span {
        tracing::debug_span!("batch", phase, rows)
    }
}
