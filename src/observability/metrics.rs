//! Client-side counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::resilience::Attempt;

/// Point-in-time copy of the client counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Logical requests issued (one per call, however many attempts).
    pub total_requests: u64,
    /// Requests that succeeded.
    pub successful_requests: u64,
    /// Requests that failed, including exhaustion and cancellation.
    pub failed_requests: u64,
    /// Network attempts across all requests.
    pub attempts: u64,
    /// Attempts after the first one of a request.
    pub retries: u64,
    /// Total request latency in milliseconds.
    pub total_latency_ms: u64,
    /// Stream fragments delivered.
    pub fragments: u64,
    /// Stream restarts announced to consumers.
    pub restarts: u64,
    /// Image tasks submitted.
    pub tasks_submitted: u64,
    /// Task status polls answered (cached answers included).
    pub tasks_polled: u64,
}

impl MetricsSnapshot {
    /// Calculates average latency in milliseconds.
    pub fn average_latency_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.total_requests as f64
        }
    }

    /// Calculates success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            100.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }
}

/// Lock-free counters shared by the client's services.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    total_latency_ms: AtomicU64,
    fragments: AtomicU64,
    restarts: AtomicU64,
    tasks_submitted: AtomicU64,
    tasks_polled: AtomicU64,
}

impl ClientMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the end of a logical request.
    pub fn record_request(&self, success: bool, duration: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_ms.fetch_add(
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    /// Records one attempt reported by the retry policy.
    pub fn record_attempt(&self, attempt: &Attempt) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if attempt.index > 0 {
            self.retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a delivered fragment.
    pub fn record_fragment(&self) {
        self.fragments.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a stream restart.
    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an image task submission.
    pub fn record_task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an answered status poll.
    pub fn record_task_polled(&self) {
        self.tasks_polled.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            fragments: self.fragments.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_polled: self.tasks_polled.load(Ordering::Relaxed),
        }
    }

    /// Resets all counters.
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.successful_requests,
            &self.failed_requests,
            &self.attempts,
            &self.retries,
            &self.total_latency_ms,
            &self.fragments,
            &self.restarts,
            &self.tasks_submitted,
            &self.tasks_polled,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
