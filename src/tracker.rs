//! Job status tracker: the lifecycle state machine for every discovered job.

use std::collections::HashMap;

use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::error::InvalidTransition;
use crate::models::{JobId, JobStatus, RunSummary};

/// Status-change notification delivered to subscribers.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Default)]
struct TrackerState {
    statuses: HashMap<JobId, JobStatus>,
    /// Jobs that entered Failed at least once, for the run summary.
    ever_failed: std::collections::HashSet<JobId>,
}

/// Tracks every job's lifecycle state and notifies listeners of changes.
///
/// The lock is held only for the duration of a single read or write, never
/// across an await on network or store activity.
pub struct JobStatusTracker {
    state: Mutex<TrackerState>,
    events: broadcast::Sender<StatusEvent>,
}

impl Default for JobStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStatusTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(TrackerState::default()),
            events,
        }
    }

    /// Subscribe to status-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Record a status change, enforcing the transition table. Invalid
    /// transitions are rejected and never coerce or corrupt existing state.
    pub async fn record_status(
        &self,
        job_id: &str,
        new_status: JobStatus,
    ) -> Result<(), InvalidTransition> {
        let mut state = self.state.lock().await;
        let current = state.statuses.get(job_id).copied();

        if !transition_allowed(current, new_status) {
            return Err(InvalidTransition {
                job_id: job_id.to_string(),
                from: current,
                to: new_status,
            });
        }

        debug!("Job {}: {:?} -> {}", job_id, current, new_status);
        state.statuses.insert(job_id.to_string(), new_status);
        if new_status == JobStatus::Failed {
            state.ever_failed.insert(job_id.to_string());
        }
        drop(state);

        // No subscribers is fine; the engine may run headless
        let _ = self.events.send(StatusEvent {
            job_id: job_id.to_string(),
            status: new_status,
        });
        Ok(())
    }

    pub async fn query_status(&self, job_id: &str) -> Option<JobStatus> {
        self.state.lock().await.statuses.get(job_id).copied()
    }

    /// Drive every non-terminal job to Abandoned, e.g. on cancellation.
    /// Returns the ids that were abandoned.
    pub async fn abandon_non_terminal(&self) -> Vec<JobId> {
        let mut abandoned = Vec::new();
        {
            let mut state = self.state.lock().await;
            for (id, status) in state.statuses.iter_mut() {
                if !status.is_terminal() {
                    *status = JobStatus::Abandoned;
                    abandoned.push(id.clone());
                }
            }
        }
        for id in &abandoned {
            let _ = self.events.send(StatusEvent {
                job_id: id.clone(),
                status: JobStatus::Abandoned,
            });
        }
        abandoned
    }

    /// Counts for the end-of-run summary.
    pub async fn summary(&self) -> RunSummary {
        let state = self.state.lock().await;
        let mut summary = RunSummary {
            found: state.statuses.len() as u64,
            failed: state.ever_failed.len() as u64,
            ..Default::default()
        };
        for status in state.statuses.values() {
            match status {
                JobStatus::Persisted => summary.persisted += 1,
                JobStatus::Abandoned => summary.abandoned += 1,
                _ => {}
            }
        }
        summary
    }
}

/// The transition table. `None` means the job is not yet known.
fn transition_allowed(from: Option<JobStatus>, to: JobStatus) -> bool {
    use JobStatus::*;
    match (from, to) {
        // First sighting
        (None, Discovered) => true,
        // Detail fetch issued
        (Some(Discovered), Fetching) => true,
        // Detail fetch disabled: partial data goes straight to extracted
        (Some(Discovered), Extracted) => true,
        (Some(Fetching), Extracted) => true,
        (Some(Fetching), Failed) => true,
        // Retry re-issues the request
        (Some(Failed), Fetching) => true,
        // Store retry re-submits the extracted record
        (Some(Failed), Extracted) => true,
        (Some(Failed), Abandoned) => true,
        (Some(Extracted), Persisted) => true,
        // Store rejected the record
        (Some(Extracted), Failed) => true,
        // Cancellation abandons anything still in flight
        (Some(Discovered), Abandoned) => true,
        (Some(Fetching), Abandoned) => true,
        (Some(Extracted), Abandoned) => true,
        _ => false,
    }
}
