//! Retry logic.
//!
//! # Responsibilities
//! - Re-run a fallible async operation up to `max_attempts` times
//! - Classify each failure as retryable or terminal
//! - Wait with exponential backoff + jitter between attempts
//! - Abort waits and attempts once the caller's deadline passes
//!
//! # Design Decisions
//! - No delay after the final attempt
//! - Terminal errors return immediately, unchanged
//! - Exhaustion wraps the last error together with the attempt count
//! - Deadline expiry is reported as `Cancelled`, never as exhaustion

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, timeout_at, Instant};

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// Backoff parameters for one retried call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay to wait after the given failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.initial_delay,
            self.max_delay,
            self.multiplier,
            self.jitter,
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Why a retried operation did not produce a value.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation failed with an error the predicate rejected.
    #[error("non-retryable failure: {0}")]
    Terminal(#[source] E),

    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        #[source]
        last_error: E,
    },

    /// The deadline passed during an attempt or a backoff wait.
    #[error("deadline exceeded after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Longest span any gateway deadline or expiry may cover.
pub const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// `now + after`, clamped to [`MAX_WAIT`] so the addition cannot overflow.
pub fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after.min(MAX_WAIT)).unwrap_or(now)
}

/// Retry `op`, treating every error as retryable.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    deadline: Instant,
    op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_if(policy, deadline, |_: &E| true, op).await
}

/// Retry `op` while `is_retryable` accepts its error.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    deadline: Instant,
    is_retryable: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match timeout_at(deadline, op(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => error,
            Err(_) => return Err(RetryError::Cancelled { attempts: attempt }),
        };

        if !is_retryable(&error) {
            return Err(RetryError::Terminal(error));
        }

        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last_error: error,
            });
        }

        let delay = policy.delay_for(attempt);
        tracing::debug!(attempt, delay = ?delay, "Attempt failed, backing off");

        if timeout_at(deadline, sleep(delay)).await.is_err() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
    }
}
