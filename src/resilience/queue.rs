//! Admission control for outbound requests.
//!
//! At most `max_concurrent` tasks run at once, tasks start in submission
//! order, and consecutive starts are at least `min_interval` apart.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::{CancelStage, ModelScopeError, ModelScopeResult};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of tasks running at once.
    pub max_concurrent: usize,
    /// Minimum spacing between consecutive task starts.
    pub min_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            min_interval: Duration::from_millis(200),
        }
    }
}

impl QueueConfig {
    /// Creates a new queue configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the concurrency bound.
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the start spacing.
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> ModelScopeResult<()> {
        if self.max_concurrent == 0 {
            return Err(ModelScopeError::configuration(
                "Queue concurrency must be at least 1",
            ));
        }
        Ok(())
    }
}

/// A held execution slot. The slot is released when this is dropped.
#[derive(Debug)]
pub struct QueueSlot {
    _permit: OwnedSemaphorePermit,
}

/// Bounded, FIFO, rate-spaced request queue.
#[derive(Debug)]
pub struct RequestQueue {
    config: QueueConfig,
    permits: Arc<Semaphore>,
    // Earliest instant the next admitted task may start. The lock doubles as
    // the FIFO admission gate: tokio's mutex wakes waiters in arrival order.
    // It is held through the spacing sleep and the instant only moves once
    // a task has actually started.
    next_start: Mutex<Instant>,
    waiting: AtomicUsize,
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RequestQueue {
    /// Creates a queue. A zero concurrency bound is treated as one.
    pub fn new(config: QueueConfig) -> Self {
        let max = config.max_concurrent.max(1);
        Self {
            config: QueueConfig {
                max_concurrent: max,
                ..config
            },
            permits: Arc::new(Semaphore::new(max)),
            next_start: Mutex::new(Instant::now()),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Runs `task` once a slot is free and the spacing allows it.
    ///
    /// The slot is held until the task's future completes, whatever its
    /// result. The result is returned unchanged.
    pub async fn submit<F, Fut, T>(&self, task: F) -> ModelScopeResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ModelScopeResult<T>>,
    {
        let _slot = self.acquire().await?;
        task().await
    }

    /// Like [`submit`](Self::submit), but gives up while still queued if
    /// `token` is cancelled. A task that has started runs to completion
    /// unless it observes the token itself.
    pub async fn submit_cancellable<F, Fut, T>(
        &self,
        token: &CancellationToken,
        task: F,
    ) -> ModelScopeResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ModelScopeResult<T>>,
    {
        let _slot = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(ModelScopeError::Cancelled { stage: CancelStage::Queue });
            }
            slot = self.acquire() => slot?,
        };
        task().await
    }

    /// Waits for a slot, honoring FIFO order and start spacing.
    ///
    /// Dropping the returned future before it resolves leaves no trace in
    /// the queue.
    pub async fn acquire(&self) -> ModelScopeResult<QueueSlot> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = WaitingGuard(&self.waiting);

        let permit = {
            let mut next_start = self.next_start.lock().await;
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|_| ModelScopeError::Cancelled {
                    stage: CancelStage::Queue,
                })?;

            let start_at = (*next_start).max(Instant::now());
            tokio::time::sleep_until(start_at).await;
            *next_start = start_at + self.config.min_interval;
            permit
        };

        tracing::trace!(
            in_flight = self.in_flight(),
            waiting = self.waiting().saturating_sub(1),
            "Queue slot granted"
        );

        Ok(QueueSlot { _permit: permit })
    }

    /// Stops admitting work. Waiting and future submissions fail with a
    /// queue cancellation; running tasks are unaffected.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Returns the number of slots currently held.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent - self.permits.available_permits()
    }

    /// Returns the number of submissions waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Returns the concurrency bound.
    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    /// Returns the configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}
