//! Retry/backoff coordinator.
//!
//! Backoff here is per-failure and grows with the attempt count; it composes
//! with the pacing policy's per-request jitter rather than replacing it.

use std::time::Duration;

use crate::config::ScrapeConfig;
use crate::error::Failure;

/// What to do about a failed page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Wait out the backoff, then re-issue on the same session.
    Retry(Duration),
    /// Rotate the session identity first, then re-issue after the backoff.
    /// Blocked fetches always take this path: repeating the same fingerprint
    /// against a block is itself a detectable pattern.
    RotateAndRetry(Duration),
    /// Retry budget exhausted; the job surfaces as Abandoned.
    Abandon,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base: config.backoff_base(),
        }
    }

    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts,
            backoff_base,
        }
    }

    /// Decide the fate of a request whose `attempt`-th try just failed.
    pub fn on_failure(&self, attempt: u32, failure: &Failure) -> RetryAction {
        if attempt >= self.max_attempts {
            return RetryAction::Abandon;
        }

        let delay = self.backoff_delay(attempt);
        if failure.is_blocked() {
            RetryAction::RotateAndRetry(delay)
        } else {
            RetryAction::Retry(delay)
        }
    }

    /// Exponential: base * 2^(attempt-1).
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }
}
