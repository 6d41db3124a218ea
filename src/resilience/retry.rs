//! Retry policy with exponential backoff and per-attempt timeouts.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::backoff::compute_delay;
use crate::errors::{CancelStage, ModelScopeError, ModelScopeResult};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, before jitter.
    pub base_delay: Duration,
    /// Upper bound on the pre-jitter delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub backoff_multiplier: f64,
    /// Symmetric jitter as a fraction of the pre-jitter delay.
    pub jitter_fraction: f64,
    /// Lower bound on every delay, applied after jitter.
    pub min_delay_floor: Duration,
    /// Time budget for a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 1.5,
            jitter_fraction: 0.2,
            min_delay_floor: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn backoff_multiplier(mut self, mult: f64) -> Self {
        self.backoff_multiplier = mult;
        self
    }

    /// Sets the jitter fraction.
    pub fn jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    /// Sets the delay floor.
    pub fn min_delay_floor(mut self, floor: Duration) -> Self {
        self.min_delay_floor = floor;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Creates a configuration with no retries.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Checks the configuration for values the backoff math cannot use.
    pub fn validate(&self) -> ModelScopeResult<()> {
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier > 1.0) {
            return Err(ModelScopeError::configuration(format!(
                "Backoff multiplier must be greater than 1.0, got {}",
                self.backoff_multiplier
            )));
        }

        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(ModelScopeError::configuration(format!(
                "Jitter fraction must be between 0.0 and 1.0, got {}",
                self.jitter_fraction
            )));
        }

        if self.base_delay > self.max_delay {
            return Err(ModelScopeError::configuration(
                "Base delay must not exceed max delay",
            ));
        }

        if self.attempt_timeout.is_zero() {
            return Err(ModelScopeError::configuration(
                "Attempt timeout must be positive",
            ));
        }

        Ok(())
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The operation produced a value.
    Success,
    /// The operation failed with a transient error.
    RetryableFailure,
    /// The operation failed with an error that is never retried.
    FatalFailure,
}

/// Record of one attempt, handed to the attempt observer.
#[derive(Debug, Clone, Copy)]
pub struct Attempt {
    /// 0-based attempt index.
    pub index: u32,
    /// Wall time spent in the attempt.
    pub elapsed: Duration,
    /// How it ended.
    pub outcome: AttemptOutcome,
}

/// Callback invoked after every attempt.
pub type AttemptObserver = Arc<dyn Fn(&Attempt) + Send + Sync>;

/// Retry policy with exponential backoff.
pub struct RetryPolicy {
    config: RetryConfig,
    rng: Mutex<StdRng>,
    observer: Option<AttemptObserver>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with an entropy-seeded jitter source.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
            observer: None,
        }
    }

    /// Creates a retry policy whose jitter is reproducible.
    pub fn with_seed(config: RetryConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            observer: None,
        }
    }

    /// Installs a callback that sees every attempt.
    pub fn with_observer(mut self, observer: AttemptObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Executes an operation with retries, bounding each attempt by the
    /// configured attempt timeout.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> ModelScopeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ModelScopeResult<T>>,
    {
        self.run(None, Some(self.config.attempt_timeout), operation).await
    }

    /// Executes an operation with retries and a caller-chosen attempt timeout.
    pub async fn execute_with_timeout<F, Fut, T>(
        &self,
        timeout: Duration,
        operation: F,
    ) -> ModelScopeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ModelScopeResult<T>>,
    {
        self.run(None, Some(timeout), operation).await
    }

    /// Executes an operation with retries, abandoning it as soon as `token`
    /// is cancelled, whether an attempt is in flight or a backoff is pending.
    ///
    /// With `timeout` set to `None` the attempts are not bounded here and
    /// the operation is expected to enforce its own deadlines.
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
        self.run(Some(token), timeout, operation).await
    }

    #[instrument(skip_all, fields(max_retries = self.config.max_retries, timeout_ms = timeout.map(|t| t.as_millis() as u64)))]
    async fn run<F, Fut, T>(
        &self,
        cancel: Option<&CancellationToken>,
        timeout: Option<Duration>,
        mut operation: F,
    ) -> ModelScopeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ModelScopeResult<T>>,
    {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(ModelScopeError::Cancelled {
                    stage: CancelStage::Attempt,
                });
            }

            let started = Instant::now();
            let bounded = async {
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, operation())
                        .await
                        .unwrap_or_else(|_| {
                            Err(ModelScopeError::Timeout {
                                message: format!("attempt {} exceeded {:?}", attempt + 1, limit),
                            })
                        }),
                    None => operation().await,
                }
            };

            let result = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!(attempt = attempt + 1, "Attempt abandoned on cancellation");
                        return Err(ModelScopeError::Cancelled { stage: CancelStage::Attempt });
                    }
                    result = bounded => result,
                },
                None => bounded.await,
            };

            let outcome = match &result {
                Ok(_) => AttemptOutcome::Success,
                Err(err) if err.is_retryable() => AttemptOutcome::RetryableFailure,
                Err(_) => AttemptOutcome::FatalFailure,
            };
            self.observe(Attempt {
                index: attempt,
                elapsed: started.elapsed(),
                outcome,
            });

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if outcome == AttemptOutcome::FatalFailure => return Err(err),
                Err(err) => err,
            };

            if attempt + 1 >= max_attempts {
                tracing::warn!(attempts = attempt + 1, error = %err, "Retries exhausted");
                return Err(ModelScopeError::RetriesExhausted {
                    attempts: attempt + 1,
                    last_error: Box::new(err),
                });
            }

            let delay = self.calculate_delay(attempt, &err);

            tracing::info!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after error"
            );

            match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        return Err(ModelScopeError::Cancelled { stage: CancelStage::Backoff });
                    }
                    _ = tokio::time::sleep(delay) => {}
                },
                None => tokio::time::sleep(delay).await,
            }

            attempt += 1;
        }
    }

    /// Calculates the delay before retry `attempt`.
    ///
    /// A server-provided `retry-after` lengthens the computed delay, capped
    /// at the configured maximum.
    fn calculate_delay(&self, attempt: u32, error: &ModelScopeError) -> Duration {
        let computed = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            compute_delay(attempt, &self.config, &mut *rng)
        };

        match error.retry_after() {
            Some(hint) => computed.max(hint.min(self.config.max_delay)),
            None => computed,
        }
    }

    fn observe(&self, attempt: Attempt) {
        tracing::debug!(
            attempt = attempt.index + 1,
            elapsed_ms = attempt.elapsed.as_millis() as u64,
            outcome = ?attempt.outcome,
            "Attempt finished"
        );
        if let Some(observer) = &self.observer {
            observer(&attempt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig::new()
            .max_retries(3)
            .base_delay(Duration::from_millis(10))
            .max_delay(Duration::from_millis(100))
            .backoff_multiplier(2.0)
            .jitter_fraction(0.0)
            .min_delay_floor(Duration::ZERO)
    }

    fn unavailable() -> ModelScopeError {
        ModelScopeError::from_status(503, &HashMap::new(), b"busy")
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_delay, Duration::from_millis(300));
        assert_eq!(config.max_delay, Duration::from_secs(2));
        assert_eq!(config.min_delay_floor, Duration::from_millis(500));
        assert_eq!(config.attempt_timeout, Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RetryConfig::new().backoff_multiplier(1.0).validate().is_err());
        assert!(RetryConfig::new().jitter_fraction(1.5).validate().is_err());
        assert!(RetryConfig::new()
            .base_delay(Duration::from_secs(5))
            .validate()
            .is_err());
        assert!(RetryConfig::new()
            .attempt_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_try() {
        let policy = RetryPolicy::new(fast_config());
        let calls = AtomicU32::new(0);

        let result = policy
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ModelScopeError>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(fast_config());
        let calls = AtomicU32::new(0);

        let result = policy
            .execute(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(unavailable())
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let policy = RetryPolicy::new(fast_config());
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: ModelScopeResult<()> = policy
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ModelScopeError::from_status(401, &HashMap::new(), b"bad key"))
            })
            .await;

        assert!(matches!(
            result,
            Err(ModelScopeError::Authentication { status_code: 401, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_max_retries_plus_one() {
        let policy = RetryPolicy::new(fast_config().max_retries(2));
        let calls = AtomicU32::new(0);

        let result: ModelScopeResult<()> = policy
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(ModelScopeError::RetriesExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.status_code(), Some(503));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retries_surfaces_first_failure_as_exhausted() {
        let policy = RetryPolicy::new(RetryConfig::no_retries());
        let calls = AtomicU32::new(0);

        let result: ModelScopeResult<()> = policy
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(ModelScopeError::RetriesExhausted { attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_twice_then_ok_waits_between_attempts() {
        let config = RetryConfig::new()
            .max_retries(2)
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(1000))
            .backoff_multiplier(2.0)
            .jitter_fraction(0.0)
            .min_delay_floor(Duration::from_millis(100));
        let policy = RetryPolicy::with_seed(config, 11);
        let starts = Mutex::new(Vec::new());

        let result = policy
            .execute(|| async {
                let mut starts = starts.lock().unwrap();
                starts.push(Instant::now());
                if starts.len() < 3 {
                    Err(ModelScopeError::from_status(429, &HashMap::new(), b""))
                } else {
                    Ok("A")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "A");
        let starts = starts.into_inner().unwrap();
        assert_eq!(starts.len(), 3);

        let first = starts[1] - starts[0];
        let second = starts[2] - starts[1];
        assert!(
            first >= Duration::from_millis(100) && first <= Duration::from_millis(300),
            "first delay {:?}",
            first
        );
        assert!(
            second >= Duration::from_millis(200) && second <= Duration::from_millis(500),
            "second delay {:?}",
            second
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable() {
        let policy = RetryPolicy::new(fast_config().max_retries(1));
        let calls = AtomicU32::new(0);

        let result = policy
            .execute_with_timeout(Duration::from_millis(50), || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Ok::<_, ModelScopeError>("second")
            })
            .await;

        assert_eq!(result.unwrap(), "second");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retrying() {
        let config = fast_config().base_delay(Duration::from_secs(1)).max_delay(Duration::from_secs(1));
        let policy = RetryPolicy::new(config);
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result: ModelScopeResult<()> = policy
            .execute_cancellable(&token, Some(Duration::from_secs(5)), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            })
            .await;

        assert!(matches!(
            result,
            Err(ModelScopeError::Cancelled {
                stage: CancelStage::Backoff
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_attempt() {
        let policy = RetryPolicy::new(fast_config());
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = policy
            .execute_cancellable(&token, Some(Duration::from_secs(5)), || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, ModelScopeError>(())
            })
            .await;

        assert!(matches!(
            result,
            Err(ModelScopeError::Cancelled {
                stage: CancelStage::Attempt
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_attempt_outlives_attempt_timeout() {
        let policy = RetryPolicy::new(fast_config().attempt_timeout(Duration::from_millis(50)));
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result = policy
            .execute_cancellable(&token, None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, ModelScopeError>("slow but fine")
            })
            .await;

        assert_eq!(result.unwrap(), "slow but fine");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_every_attempt() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let policy = RetryPolicy::new(fast_config().max_retries(1)).with_observer(Arc::new(
            move |attempt: &Attempt| sink.lock().unwrap().push(attempt.outcome),
        ));
        let calls = AtomicU32::new(0);

        let _ = policy
            .execute(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(unavailable())
                } else {
                    Ok(())
                }
            })
            .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![AttemptOutcome::RetryableFailure, AttemptOutcome::Success]
        );
    }

    #[test]
    fn test_retry_after_lengthens_delay() {
        let policy = RetryPolicy::with_seed(fast_config(), 5);
        let mut headers = HashMap::new();
        headers.insert("retry-after".to_string(), "30".to_string());
        let limited = ModelScopeError::from_status(429, &headers, b"");

        assert_eq!(policy.calculate_delay(0, &limited), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(0, &unavailable()), Duration::from_millis(10));
    }
}
