//! Bounded retry with fallback-on-exhaustion
//!
//! [`RetryExecutor`] runs an operation up to `max_retries + 1` times, sleeping with
//! exponential backoff between attempts. When every attempt fails it asks the
//! caller-supplied fallback constructor for a minimal-but-valid value instead of
//! surfacing the error. Cancellation and fatal errors short-circuit the loop and are
//! returned untouched.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::PipelineError;

/// Retry policy for guarded calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub max_retries: usize,

    /// Base delay for exponential backoff
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set backoff base duration
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Set maximum backoff duration
    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    /// Fixed delay between attempts
    pub fn with_fixed_delay(mut self, delay: Duration) -> Self {
        self.backoff_base = delay;
        self.backoff_max = delay;
        self
    }

    /// Calculate delay for a given retry attempt (exponential backoff)
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt as u32);
        let delay = self.backoff_base.saturating_mul(multiplier);
        delay.min(self.backoff_max)
    }

    /// Check if more retries are allowed
    pub fn should_retry(&self, attempts: usize) -> bool {
        attempts < self.max_retries
    }

    /// Create a no-retry policy
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

/// Snapshot of executor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStats {
    pub total_attempts: u64,
    pub total_retries: u64,
    pub total_fallbacks: u64,
    pub total_repairs: u64,
}

/// Value produced by a guarded call plus how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub value: T,
    /// Attempts of the primary operation, including the successful one
    pub attempts: usize,
    pub used_fallback: bool,
}

/// Runs operations with bounded retries and a fallback constructor
#[derive(Debug, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    attempts: AtomicU64,
    retries: AtomicU64,
    fallbacks: AtomicU64,
    repairs: AtomicU64,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation`, returning only the value
    ///
    /// See [`RetryExecutor::run_with_outcome`] for the retry and fallback rules.
    pub async fn run<T, Op, Fut, Fb>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        operation: Op,
        fallback: Fb,
    ) -> Result<T, PipelineError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
        Fb: FnOnce(&PipelineError) -> Result<T, PipelineError>,
    {
        self.run_with_outcome(label, cancel, operation, fallback)
            .await
            .map(|outcome| outcome.value)
    }

    /// Run `operation` with retries and fall back when attempts are exhausted.
    ///
    /// - Retryable errors are retried up to `max_retries` additional times.
    /// - `Cancelled` and fatal errors are returned immediately, without fallback.
    /// - Other non-retryable errors (an open circuit, for example) go straight to
    ///   the fallback.
    /// - A failing fallback yields [`PipelineError::FallbackFailed`] carrying both causes.
    pub async fn run_with_outcome<T, Op, Fut, Fb>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut operation: Op,
        fallback: Fb,
    ) -> Result<RetryOutcome<T>, PipelineError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
        Fb: FnOnce(&PipelineError) -> Result<T, PipelineError>,
    {
        let mut attempt = 0usize;

        let last_error = loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            self.attempts.fetch_add(1, Ordering::Relaxed);

            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(label, attempts = attempt + 1, "Operation succeeded after retry");
                    }
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt + 1,
                        used_fallback: false,
                    });
                }
                Err(err) if err.is_cancelled() || err.is_fatal() => return Err(err),
                Err(err) if err.is_circuit_open() => {
                    warn!(label, error = %err, "Circuit open, skipping retries");
                    break (err, attempt + 1);
                }
                Err(err) if !err.is_retryable() => {
                    warn!(label, error = %err, "Non-retryable failure");
                    break (err, attempt + 1);
                }
                Err(err) => {
                    if !self.policy.should_retry(attempt) {
                        warn!(label, attempts = attempt + 1, error = %err, "Retries exhausted");
                        break (err, attempt + 1);
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        label,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        let (original, attempts) = last_error;
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        warn!(label, error = %original, "Using fallback");

        match fallback(&original) {
            Ok(value) => Ok(RetryOutcome {
                value,
                attempts,
                used_fallback: true,
            }),
            Err(fallback_err) => Err(PipelineError::FallbackFailed {
                label: label.to_string(),
                original: Box::new(original),
                fallback: Box::new(fallback_err),
            }),
        }
    }

    /// Count a repair applied to an otherwise successful output
    pub fn record_repair(&self) {
        self.repairs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            total_attempts: self.attempts.load(Ordering::Relaxed),
            total_retries: self.retries.load(Ordering::Relaxed),
            total_fallbacks: self.fallbacks.load(Ordering::Relaxed),
            total_repairs: self.repairs.load(Ordering::Relaxed),
        }
    }
}
