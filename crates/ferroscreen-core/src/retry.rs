//! Attempt budget and backoff schedule for upstream calls.
//!
//! The upstream signals throttling with HTTP 429. Each rate-limited or
//! transiently failed attempt waits `initial * 2^retry` before the next one,
//! capped at [`MAX_BACKOFF_DELAY`].

use std::time::Duration;

/// Upper bound for a single backoff wait.
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(15 * 60);

/// Status the upstream uses for "too many requests".
pub const RATE_LIMITED_STATUS: u16 = 429;

/// Wait schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same wait before every retry.
    Fixed(Duration),
    /// `initial`, then twice the previous wait, never above `max`.
    Doubling { initial: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::doubling(Duration::from_secs(10))
    }
}

impl Backoff {
    pub const fn doubling(initial: Duration) -> Self {
        Self::Doubling {
            initial,
            max: MAX_BACKOFF_DELAY,
        }
    }

    /// Wait before retry number `retry`, counted from zero.
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed(delay) => delay,
            Self::Doubling { initial, max } => {
                let factor = 1_u32.checked_shl(retry).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// How many times one logical request may be attempted and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts including the first. Never below one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Statuses answered with a backoff instead of an error.
    pub retry_on_status: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::doubling(5, Duration::from_secs(10))
    }
}

impl RetryConfig {
    pub fn doubling(max_attempts: u32, initial_delay: Duration) -> Self {
        Self::with_backoff(max_attempts, Backoff::doubling(initial_delay))
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self::with_backoff(max_attempts, Backoff::Fixed(delay))
    }

    pub fn no_retry() -> Self {
        Self::with_backoff(1, Backoff::default())
    }

    fn with_backoff(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            retry_on_status: vec![RATE_LIMITED_STATUS],
        }
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    /// Whether another attempt may follow the 0-based `attempt` that just failed.
    pub fn has_attempts_after(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts.max(1)
    }

    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.backoff.delay(retry)
    }
}
