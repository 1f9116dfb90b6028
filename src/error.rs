//! Error taxonomy for the scrape engine.

use std::time::Duration;

use thiserror::Error;

use crate::models::JobStatus;

/// Errors produced while fetching a page through a browser session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The target site served a challenge or block page.
    #[error("request blocked by target site")]
    Blocked,

    /// The page did not finish loading within the configured timeout.
    #[error("page load timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure (DNS, connection reset, proxy down).
    #[error("network error: {0}")]
    Network(String),

    /// The browser failed to render or expose the page content.
    #[error("render error: {0}")]
    Render(String),
}

/// Errors produced while turning raw page content into records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    /// Expected structural markers are missing from the page.
    #[error("malformed page: {0}")]
    Malformed(String),
}

/// Errors produced by the record sink.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store refused the record.
    #[error("record rejected: {0}")]
    Rejected(String),
}

/// Invariant violation in the job status state machine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid transition for job {job_id}: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub job_id: String,
    pub from: Option<JobStatus>,
    pub to: JobStatus,
}

/// Any recoverable per-request failure, fed to the retry coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Failure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Failure {
    /// Blocked fetches must never be retried on the same session identity.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Failure::Fetch(FetchError::Blocked))
    }
}

/// Run-level failures surfaced to the presentation layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    /// Several fresh sessions were blocked immediately after rotation; the
    /// anti-detection strategy itself has failed, not an individual request.
    #[error("persistent block: {0} consecutive sessions blocked immediately after rotation")]
    PersistentBlock(u32),

    /// Could not open a browser session at all.
    #[error("failed to open browser session: {0}")]
    SessionOpen(FetchError),
}
