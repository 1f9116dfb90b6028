//! Randomized pacing policy.
//!
//! Every anti-detection timing decision lives here so it can be tested
//! without driving a real browser: per-request delays, per-session request
//! ceilings, and session age limits.

use std::time::Duration;

use rand::Rng;

use crate::config::{DelayRange, ScrapeConfig};
use crate::models::PageKind;

/// Computes randomized inter-request delays and rotation thresholds.
#[derive(Debug, Clone)]
pub struct PacingPolicy {
    search_delay: DelayRange,
    detail_delay: DelayRange,
    rotation_requests: DelayRange,
    session_max_age: Duration,
}

impl PacingPolicy {
    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self {
            search_delay: config.search_delay,
            detail_delay: config.detail_delay,
            rotation_requests: config.rotation_requests,
            session_max_age: config.session_max_age(),
        }
    }

    /// Delay to apply before the next request of the given kind, drawn
    /// uniformly from the configured range.
    pub fn delay_before(&self, kind: PageKind) -> Duration {
        let range = match kind {
            PageKind::Search => self.search_delay,
            PageKind::Detail => self.detail_delay,
        };
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(range.min_ms..=range.max_ms))
    }

    /// Request ceiling for a fresh session, re-rolled at every session open
    /// so the rotation cadence is not uniform across sessions.
    pub fn roll_request_ceiling(&self) -> u32 {
        let mut rng = rand::thread_rng();
        rng.gen_range(self.rotation_requests.min_ms..=self.rotation_requests.max_ms) as u32
    }

    /// Age limit for a fresh session: between 80% and 100% of the configured
    /// maximum, re-rolled per session.
    pub fn roll_age_limit(&self) -> Duration {
        let max_ms = self.session_max_age.as_millis() as u64;
        let min_ms = max_ms - max_ms / 5;
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(min_ms..=max_ms))
    }

    /// Whether a session that has served `requests` over `age` should rotate,
    /// given the ceilings rolled for it at open.
    pub fn should_rotate(
        &self,
        requests: u32,
        age: Duration,
        request_ceiling: u32,
        age_limit: Duration,
    ) -> bool {
        requests >= request_ceiling || age >= age_limit
    }
}
