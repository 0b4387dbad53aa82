//! Retry combinator with exponential backoff and jitter.
//!
//! The orchestrator applies [`retry_with_backoff`] uniformly to every adapter
//! call; adapters never loop or sleep on their own.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::deadline::Deadline;

/// Backoff strategy for retrying failed requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay is calculated as `base * (factor ^ attempt)`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(250),
            factor: 2.0,
            max: Duration::from_secs(4),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Calculate the delay for a given retry attempt (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(attempt.min(i32::MAX as u32) as i32);
                let seconds = base.as_secs_f64() * scale;
                let capped_seconds = seconds.min(max.as_secs_f64());

                let mut delay = Duration::from_secs_f64(capped_seconds);

                // +/- 50% of the delay
                if jitter {
                    let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                    let random_offset = fastrand::u64(0..=(jitter_ms * 2));
                    let total_ms =
                        delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
                    delay = Duration::from_millis(total_ms.max(0) as u64);
                }

                delay
            }
        }
    }
}

/// Per-adapter retry budget for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// Final attempt plus every transient failure that preceded it, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub last: T,
    pub failed_attempts: Vec<T>,
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> usize {
        self.failed_attempts.len() + 1
    }
}

/// Runs `attempt` until it yields a non-transient outcome, retries run out, or
/// the next backoff would not fit in the deadline.
///
/// `is_transient` classifies outcomes; only transient ones are retried.
pub async fn retry_with_backoff<T, F, Fut, C>(
    config: &RetryConfig,
    deadline: &Deadline,
    mut attempt: F,
    is_transient: C,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = T>,
    C: Fn(&T) -> bool,
{
    let mut failed_attempts = Vec::new();
    let mut attempt_no = 0_u32;

    loop {
        let outcome = attempt(attempt_no).await;
        if attempt_no >= config.max_retries || !is_transient(&outcome) {
            return RetryOutcome {
                last: outcome,
                failed_attempts,
            };
        }

        let delay = config.delay_for_attempt(attempt_no);
        if delay >= deadline.remaining() || deadline.sleep(delay).await.is_err() {
            debug!(attempt = attempt_no, ?delay, "retry budget exhausted by deadline");
            return RetryOutcome {
                last: outcome,
                failed_attempts,
            };
        }

        failed_attempts.push(outcome);
        attempt_no += 1;
    }
}
