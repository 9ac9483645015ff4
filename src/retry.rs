//! Retry policy for transient fetch failures
//!
//! Retries do not loop inside a worker slot. A transiently failed task goes
//! back to the queue tail with its attempt counter incremented, and only
//! becomes claimable again once [`backoff_delay`] has elapsed. This keeps the
//! slot free for other work while the source recovers.

use crate::config::RetryConfig;
use crate::error::{Error, FetchError};
use crate::types::FailureKind;
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, connection reset) should return `true`.
/// Permanent failures (chapter removed, malformed payload, disk full) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the task should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        self.failure_kind() == FailureKind::Transient
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        self.failure_kind() == FailureKind::Transient
    }
}

/// Outcome of applying the retry budget to a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue at the tail with the new attempt counter after the delay
    Requeue {
        /// Attempt counter after this failure
        attempt: u32,
        /// Delay before the task is claimable again
        delay: Duration,
    },
    /// Give up; the task moves to Error
    GiveUp {
        /// Attempt counter recorded on the failed task
        attempt: u32,
    },
}

/// Decide what happens to a task that failed on attempt `attempt` (0-based count
/// of earlier failures).
///
/// Transient failures consume one unit of the budget; anything else gives up
/// immediately without touching the counter.
pub fn decide<E: IsRetryable>(config: &RetryConfig, attempt: u32, error: &E) -> RetryDecision {
    if !error.is_retryable() {
        return RetryDecision::GiveUp { attempt };
    }

    let next = attempt.saturating_add(1);
    if next >= config.max_attempts {
        RetryDecision::GiveUp { attempt: next }
    } else {
        RetryDecision::Requeue {
            attempt: next,
            delay: backoff_delay(config, next),
        }
    }
}

/// Delay before retry number `attempt` (1-based) becomes claimable
///
/// `initial_delay * backoff_multiplier^(attempt - 1)`, capped at `max_delay`,
/// with optional jitter.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32) as i32;
    let secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    // NaN or out-of-range products fall back to the cap
    let delay = Duration::try_from_secs_f64(secs.min(config.max_delay.as_secs_f64()))
        .unwrap_or(config.max_delay);

    if config.jitter {
        add_jitter(delay).min(config.max_delay)
    } else {
        delay
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::try_from_secs_f64(jittered_secs).unwrap_or(delay)
}
