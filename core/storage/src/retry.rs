//! Retry strategy with exponential backoff for transient errors.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use valuestocks_common::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Create a new retry policy.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// `base_delay × 2^(attempt−1)`, saturating instead of overflowing.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.base_delay
            .saturating_mul(2u32.checked_pow(exponent).unwrap_or(u32::MAX))
    }

    /// Sum of every delay slept when all attempts fail.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Retry executor for running operations with retry logic.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Execute an operation, retrying errors that `Error::is_retryable`
    /// classifies as transient.
    ///
    /// Non-retryable errors are returned as-is after the first attempt.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_condition(operation, Error::is_retryable)
            .await
    }

    /// Execute with a custom retry condition.
    ///
    /// # Errors
    /// - The operation's own error when `should_retry` rejects it
    /// - `Error::RetryExhausted` once `max_attempts` attempts have failed
    pub async fn execute_with_condition<F, Fut, T, C>(
        &self,
        operation: F,
        should_retry: C,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&Error) -> bool,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("Operation succeeded on attempt {}", attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !should_retry(&err) {
                        return Err(err);
                    }

                    if attempt >= max_attempts {
                        warn!("Operation failed after {} attempts: {}", attempt, err);
                        return Err(Error::RetryExhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        });
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}...",
                        attempt, err, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Get the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

/// Convenience function for retry with a given policy.
pub async fn retry<F, Fut, T>(policy: RetryPolicy, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryExecutor::new(policy).execute(operation).await
}
