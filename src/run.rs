//! Run engine: executes one search end to end.
//!
//! The engine owns the shared pieces (tracker, store, event channel) and
//! builds per-run state (session controller, sequencer, dedup set) inside
//! `run`. Requests execute serially through one session; concurrency shows up
//! only at the edges, in cancellation and event delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::browser::BrowserDriver;
use crate::config::ScrapeConfig;
use crate::error::{Failure, RunError};
use crate::extract::{self, DedupSet};
use crate::models::{JobId, JobRecord, JobStatus, PageKind, RunSummary, SearchCriteria};
use crate::retry::{RetryAction, RetryPolicy};
use crate::sequencer::QuerySequencer;
use crate::session::SessionController;
use crate::store::JobStore;
use crate::tracker::JobStatusTracker;

/// Events emitted over the engine's broadcast channel for the presentation
/// layer. Delivery is best-effort; the run never blocks on a slow listener.
#[derive(Debug, Clone)]
pub enum RunEvent {
    StatusChanged { job_id: JobId, status: JobStatus },
    RecordPersisted(JobRecord),
    /// Fresh sessions keep getting blocked right after rotation; the run is
    /// aborting rather than hammering the site further.
    PersistentBlock,
    RunComplete(RunSummary),
}

pub struct ScrapeEngine {
    config: Arc<ScrapeConfig>,
    driver: Arc<dyn BrowserDriver>,
    store: Arc<dyn JobStore>,
    tracker: Arc<JobStatusTracker>,
    events: broadcast::Sender<RunEvent>,
    cancel: watch::Sender<bool>,
}

impl ScrapeEngine {
    pub fn new(
        config: Arc<ScrapeConfig>,
        driver: Arc<dyn BrowserDriver>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let (cancel, _) = watch::channel(false);
        Self {
            config,
            driver,
            store,
            tracker: Arc::new(JobStatusTracker::new()),
            events,
            cancel,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    pub fn tracker(&self) -> Arc<JobStatusTracker> {
        self.tracker.clone()
    }

    /// Request cancellation. The run finishes its in-flight fetch, drives
    /// every non-terminal job to Abandoned, and returns its summary.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Execute one search to completion. One run at a time per engine.
    pub async fn run(&self, criteria: SearchCriteria) -> Result<RunSummary, RunError> {
        let mut cancel_rx = self.cancel.subscribe();
        let policy = RetryPolicy::from_config(&self.config);
        let mut controller = SessionController::new(self.driver.clone(), self.config.clone());
        let mut sequencer = QuerySequencer::new(criteria, &self.config);
        let dedup = DedupSet::new();

        match self.store.known_ids().await {
            Ok(ids) => {
                debug!("Seeding dedup set with {} known job ids", ids.len());
                dedup.seed(ids).await;
            }
            Err(err) => warn!("Could not seed dedup set from store: {}", err),
        }

        // Partial records from search pages, awaiting their detail fetch.
        let mut partial: HashMap<JobId, JobRecord> = HashMap::new();
        let mut cancelled = *cancel_rx.borrow();

        'requests: while let Some(request) = sequencer.next_request() {
            if cancelled {
                break;
            }

            if let Some(job_id) = request.job_id.clone() {
                self.set_status(&job_id, JobStatus::Fetching).await;
            }

            let fetched = tokio::select! {
                _ = cancel_rx.changed() => {
                    cancelled = true;
                    break 'requests;
                }
                result = controller.fetch(&request) => result,
            };

            let failure = match fetched {
                Err(err) => Some(Failure::Fetch(err)),
                Ok(page) => match request.kind {
                    PageKind::Search => {
                        match extract::parse_search_page(&page.content, page.fetched_at) {
                            Ok(parsed) => {
                                if self
                                    .accept_search_page(
                                        parsed,
                                        &dedup,
                                        &mut partial,
                                        &mut sequencer,
                                        &policy,
                                        &mut cancel_rx,
                                    )
                                    .await
                                {
                                    cancelled = true;
                                    break 'requests;
                                }
                                None
                            }
                            Err(err) => Some(Failure::Extract(err)),
                        }
                    }
                    PageKind::Detail => {
                        match extract::parse_detail_page(&page.content, page.fetched_at) {
                            Ok(detail) => {
                                if let Some(job_id) = request.job_id.clone() {
                                    if let Some(mut record) = partial.remove(&job_id) {
                                        record.description = Some(detail.description);
                                        if record.posted_at.is_none() {
                                            record.posted_at = detail.posted_at;
                                        }
                                        self.set_status(&job_id, JobStatus::Extracted).await;
                                        if self.persist(record, &policy, &mut cancel_rx).await {
                                            cancelled = true;
                                            break 'requests;
                                        }
                                    }
                                }
                                None
                            }
                            Err(err) => Some(Failure::Extract(err)),
                        }
                    }
                },
            };

            let Some(failure) = failure else {
                continue;
            };

            warn!(
                "Request failed (attempt {} of {}): {} [{}]",
                request.attempt, self.config.max_attempts, failure, request.url
            );
            if let Some(job_id) = request.job_id.clone() {
                self.set_status(&job_id, JobStatus::Failed).await;
            }

            if failure.is_blocked() && controller.persistently_blocked() {
                return self.abort_persistent_block(&mut controller).await;
            }

            match policy.on_failure(request.attempt, &failure) {
                RetryAction::Retry(delay) => {
                    if sleep_or_cancelled(delay, &mut cancel_rx).await {
                        cancelled = true;
                        break 'requests;
                    }
                    sequencer.requeue(request);
                }
                RetryAction::RotateAndRetry(delay) => {
                    if let Err(err) = controller.rotate().await {
                        warn!("Session rotation failed: {}", err);
                        self.finish(&mut controller).await;
                        return Err(RunError::SessionOpen(err));
                    }
                    if sleep_or_cancelled(delay, &mut cancel_rx).await {
                        cancelled = true;
                        break 'requests;
                    }
                    sequencer.requeue(request);
                }
                RetryAction::Abandon => match request.kind {
                    PageKind::Search => {
                        info!("Abandoning search pagination after repeated failures");
                        sequencer.on_search_abandoned();
                    }
                    PageKind::Detail => {
                        if let Some(job_id) = request.job_id.clone() {
                            partial.remove(&job_id);
                            self.set_status(&job_id, JobStatus::Abandoned).await;
                        }
                    }
                },
            }
        }

        if cancelled {
            info!("Run cancelled; abandoning in-flight jobs");
        }
        let summary = self.finish(&mut controller).await;
        info!(
            "Run complete: {} found, {} persisted, {} failed, {} abandoned ({} rotations)",
            summary.found,
            summary.persisted,
            summary.failed,
            summary.abandoned,
            controller.rotations()
        );
        Ok(summary)
    }

    /// Fold a parsed search page into run state: claim new ids, queue detail
    /// work or persist partial records immediately. Returns true when the
    /// run was cancelled mid-page.
    async fn accept_search_page(
        &self,
        parsed: extract::SearchPage,
        dedup: &DedupSet,
        partial: &mut HashMap<JobId, JobRecord>,
        sequencer: &mut QuerySequencer,
        policy: &RetryPolicy,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        let mut new_ids = Vec::new();
        for job in parsed.jobs {
            if !dedup.insert(&job.job_id).await {
                debug!("Duplicate job id {}, dropping", job.job_id);
                continue;
            }
            self.set_status(&job.job_id, JobStatus::Discovered).await;
            new_ids.push(job.job_id.clone());
            if self.config.fetch_details {
                partial.insert(job.job_id.clone(), job);
            } else {
                self.set_status(&job.job_id, JobStatus::Extracted).await;
                if self.persist(job, policy, cancel_rx).await {
                    return true;
                }
            }
        }
        sequencer.on_search_parsed(&new_ids, parsed.has_next);
        false
    }

    /// Write one record, retrying rejections on the normal budget. The job
    /// ends in Persisted or Abandoned, with each rejection recorded as a
    /// Failed transition. Returns true when the run was cancelled mid-write;
    /// the job is then left for `finish` to abandon.
    async fn persist(
        &self,
        record: JobRecord,
        policy: &RetryPolicy,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        let mut attempt = 1;
        loop {
            let written = tokio::select! {
                _ = cancel_rx.changed() => return true,
                result = self.store.write(&record) => result,
            };
            match written {
                Ok(()) => {
                    self.set_status(&record.job_id, JobStatus::Persisted).await;
                    let _ = self.events.send(RunEvent::RecordPersisted(record));
                    return false;
                }
                Err(err) => {
                    warn!(
                        "Store rejected {} (attempt {}): {}",
                        record.job_id, attempt, err
                    );
                    self.set_status(&record.job_id, JobStatus::Failed).await;
                    match policy.on_failure(attempt, &Failure::Store(err)) {
                        RetryAction::Retry(delay) | RetryAction::RotateAndRetry(delay) => {
                            if sleep_or_cancelled(delay, cancel_rx).await {
                                return true;
                            }
                            // Re-enter Extracted for the re-submission
                            self.set_status(&record.job_id, JobStatus::Extracted).await;
                            attempt += 1;
                        }
                        RetryAction::Abandon => {
                            self.set_status(&record.job_id, JobStatus::Abandoned).await;
                            return false;
                        }
                    }
                }
            }
        }
    }

    async fn abort_persistent_block(
        &self,
        controller: &mut SessionController,
    ) -> Result<RunSummary, RunError> {
        warn!("Persistent block detected, aborting run");
        let _ = self.events.send(RunEvent::PersistentBlock);
        let sessions = crate::session::PERSISTENT_BLOCK_SESSIONS;
        self.finish(controller).await;
        Err(RunError::PersistentBlock(sessions))
    }

    /// Close out the run: every non-terminal job goes to Abandoned, the
    /// session closes, and the final summary is broadcast.
    async fn finish(&self, controller: &mut SessionController) -> RunSummary {
        for job_id in self.tracker.abandon_non_terminal().await {
            let _ = self.events.send(RunEvent::StatusChanged {
                job_id,
                status: JobStatus::Abandoned,
            });
        }
        controller.close().await;
        let summary = self.tracker.summary().await;
        let _ = self.events.send(RunEvent::RunComplete(summary));
        summary
    }

    async fn set_status(&self, job_id: &str, status: JobStatus) {
        match self.tracker.record_status(job_id, status).await {
            Ok(()) => {
                let _ = self.events.send(RunEvent::StatusChanged {
                    job_id: job_id.to_string(),
                    status,
                });
            }
            Err(err) => warn!("Ignoring status change: {}", err),
        }
    }
}

/// Sleep for `delay` unless the cancel signal fires first. True means the
/// run was cancelled and the caller should stop issuing work.
async fn sleep_or_cancelled(delay: Duration, cancel_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = cancel_rx.changed() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
