//! Logging and metrics.

mod logging;
pub mod metrics;

pub use logging::{init_tracing, spans};
pub use metrics::{gather_metrics, init_metrics};
