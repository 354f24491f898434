//! # Retry Policy
//!
//! Deterministic exponential backoff shared by both transports. The
//! stream pipeline and the outbox publisher each carry their own
//! independently-tuned instance, but the curve is the same formula:
//! `backoff(n) = min(base * 2^(n-1), max)` with no jitter.

use std::time::Duration;

/// Stored error messages are truncated to this many characters.
pub const ERROR_MESSAGE_CAP: usize = 2000;

/// Attempt budget and backoff curve for one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: i32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff,
            max_backoff,
        }
    }

    /// Whether an attempt count has consumed the whole budget.
    pub fn is_exhausted(&self, attempt_count: i32) -> bool {
        attempt_count >= self.max_attempts
    }

    /// Delay before retry `attempt` (1-based). Zero for non-positive
    /// attempts; the exponent is saturated so large attempt numbers cannot
    /// overflow, they just pin the delay at `max_backoff`.
    pub fn backoff(&self, attempt: i32) -> Duration {
        if attempt <= 0 {
            return Duration::ZERO;
        }
        let shift = u32::try_from(attempt - 1).unwrap_or(u32::MAX).min(63);
        let multiplier = 1u128 << shift;
        let millis = (self.base_backoff.as_millis()).saturating_mul(multiplier);
        let capped = millis.min(self.max_backoff.as_millis());
        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }
}

/// Cap an error message for storage, respecting char boundaries.
pub fn truncate_error(message: &str) -> String {
    if message.chars().count() <= ERROR_MESSAGE_CAP {
        return message.to_string();
    }
    message.chars().take(ERROR_MESSAGE_CAP).collect()
}
