//! Retry policy: exponential backoff with a ceiling and a dead-letter threshold.

#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)] // delays are far below f64 precision

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed attempts after which an operation is dead-lettered
    pub max_retries: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Delay ceiling
    pub max_delay: Duration,
    /// Exponential growth factor
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// `base * factor^(failures - 1)`, capped at `max_delay`; non-decreasing
    /// in `failures`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let delay_ms = (base_ms * self.backoff_factor.powi(exponent)).min(max_ms);

        if delay_ms.is_finite() {
            Duration::from_millis(delay_ms as u64)
        } else {
            self.max_delay
        }
    }

    /// `next_attempt_at` for an operation failing at `now` (Unix ms)
    pub fn next_attempt_at(&self, now: i64, failures: u32) -> i64 {
        let delay = i64::try_from(self.delay_after(failures).as_millis()).unwrap_or(i64::MAX);
        now.saturating_add(delay)
    }

    /// Whether a failure bringing the count to `failures` exhausts the budget
    pub const fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_retries
    }
}
