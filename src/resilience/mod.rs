//! Resilience layer for the ModelScope client.
//!
//! Every outbound request is admitted by the [`RequestQueue`] and then driven
//! by the [`RetryPolicy`]. A request holds its queue slot for all of its
//! attempts and backoff sleeps, so retries never jump the queue.

mod backoff;
mod queue;
mod retry;

pub use backoff::compute_delay;
pub use queue::{QueueConfig, QueueSlot, RequestQueue};
pub use retry::{Attempt, AttemptObserver, AttemptOutcome, RetryConfig, RetryPolicy};

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::ModelScopeResult;

/// Configuration for the resilience orchestrator.
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Queue configuration.
    pub queue: QueueConfig,
}

impl ResilienceConfig {
    /// Checks both halves of the configuration.
    pub fn validate(&self) -> ModelScopeResult<()> {
        self.retry.validate()?;
        self.queue.validate()
    }
}

/// Orchestrates admission control and retries.
#[derive(Debug)]
pub struct ResilienceOrchestrator {
    retry_policy: RetryPolicy,
    queue: RequestQueue,
}

impl ResilienceOrchestrator {
    /// Creates a new resilience orchestrator.
    pub fn new(config: ResilienceConfig) -> Self {
        Self::from_parts(RetryPolicy::new(config.retry), RequestQueue::new(config.queue))
    }

    /// Creates an orchestrator from an existing policy and queue.
    pub fn from_parts(retry_policy: RetryPolicy, queue: RequestQueue) -> Self {
        Self {
            retry_policy,
            queue,
        }
    }

    /// Creates with default configuration.
    pub fn default_config() -> Self {
        Self::new(ResilienceConfig::default())
    }

    /// Executes an operation through the queue and the retry policy.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> ModelScopeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ModelScopeResult<T>>,
    {
        self.queue
            .submit(|| self.retry_policy.execute(operation))
            .await
    }

    /// Like [`execute`](Self::execute) with a caller-chosen attempt timeout.
    pub async fn execute_with_timeout<F, Fut, T>(
        &self,
        timeout: Duration,
        operation: F,
    ) -> ModelScopeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ModelScopeResult<T>>,
    {
        self.queue
            .submit(|| self.retry_policy.execute_with_timeout(timeout, operation))
            .await
    }

    /// Like [`execute_with_timeout`](Self::execute_with_timeout), abandoning
    /// the request at whatever stage it has reached once `token` fires.
    /// A `None` timeout leaves each attempt to bound itself.
    pub async fn execute_cancellable<F, Fut, T>(
        &self,
        token: &CancellationToken,
        timeout: Option<Duration>,
        operation: F,
    ) -> ModelScopeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ModelScopeResult<T>>,
    {
        self.queue
            .submit_cancellable(token, || {
                self.retry_policy
                    .execute_cancellable(token, timeout, operation)
            })
            .await
    }

    /// Returns the retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the request queue.
    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }
}

impl Default for ResilienceOrchestrator {
    fn default() -> Self {
        Self::default_config()
    }
}
