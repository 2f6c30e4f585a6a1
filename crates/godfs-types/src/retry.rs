//! Bounded retry policy.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Exponential backoff with a capped delay and an optional attempt limit.
///
/// Loops that used to retry forever with a fixed sleep take one of these, so
/// tests can drive them to completion deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Give up after this many attempts; `None` retries with the capped delay
    /// indefinitely.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Policy with a capped delay and no attempt limit.
    pub fn capped(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            max_attempts: None,
        }
    }

    /// Limit the number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// Doubles from `base_delay` and saturates at `max_delay`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let shift = failures.saturating_sub(1).min(20);
        let factor = 1u32 << shift;
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts` attempts.
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::capped(Duration::from_millis(500), Duration::from_secs(30))
    }
}
