//! Retry policy for chunk dispatch
//!
//! Client errors (4xx) are permanent; everything else is retried with
//! exponential backoff until the attempt budget runs out.

use std::future::Future;
use std::time::Duration;

use crate::engine::PartitionError;

/// Default number of retries after the first attempt
pub const DEFAULT_RETRIES: u32 = 2;

/// One failed attempt inside a retry loop
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    pub attempt_number: u32,
    pub error: &'a PartitionError,
    pub next_delay: Duration,
}

/// Retry classification and backoff schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    max_attempts: u32,
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRIES + 1, Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one attempt
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            multiplier: 2.0,
            max_delay,
        }
    }

    /// Policy that never sleeps between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a failed call is worth replaying
    pub fn should_retry(&self, error: &PartitionError) -> bool {
        !error.status_code().is_client_error()
    }

    /// Delay before the attempt following `attempt_number` (1-indexed)
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(31) as i32;
        self.initial_delay
            .mul_f64(self.multiplier.powi(exponent))
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// `op` receives the 1-indexed attempt number. On exhaustion the last error
    /// is returned unchanged.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, PartitionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, PartitionError>>,
    {
        let mut attempt_number = 1;
        loop {
            let error = match op(attempt_number).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.should_retry(&error) || attempt_number >= self.max_attempts {
                return Err(error);
            }

            let attempt = RetryAttempt {
                attempt_number,
                error: &error,
                next_delay: self.delay_for(attempt_number),
            };
            tracing::warn!(
                attempt = attempt.attempt_number,
                max_attempts = self.max_attempts,
                kind = attempt.error.kind(),
                status = attempt.error.status_code().as_u16(),
                delay_ms = attempt.next_delay.as_millis() as u64,
                "Partition call failed, retrying: {}",
                attempt.error
            );

            if !attempt.next_delay.is_zero() {
                tokio::time::sleep(attempt.next_delay).await;
            }
            attempt_number += 1;
        }
    }
}
