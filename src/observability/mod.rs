//! Observability module for the ModelScope client.
//!
//! Provides subscriber setup, log redaction, and client counters. All
//! instrumentation goes through `tracing`; this module only configures where
//! it ends up.

mod logging;
mod metrics;

pub use logging::{init_tracing, redact, LogConfig, LogLevel};
pub use metrics::{ClientMetrics, MetricsSnapshot};

use std::time::{Duration, Instant};

/// Request timer for measuring operation duration.
#[derive(Debug)]
pub struct RequestTimer {
    start: Instant,
    operation: &'static str,
}

impl RequestTimer {
    /// Creates a new request timer.
    pub fn new(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer, records the request in `metrics` and returns the
    /// elapsed time.
    pub fn finish(self, metrics: &ClientMetrics, success: bool) -> Duration {
        let elapsed = self.elapsed();
        metrics.record_request(success, elapsed);
        tracing::debug!(
            operation = self.operation,
            success,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request finished"
        );
        elapsed
    }
}
