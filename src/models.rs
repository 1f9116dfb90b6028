//! Core data model: search criteria, page requests, and job records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Site-native job identifier, the sole deduplication key.
pub type JobId = String;

/// What the user asked for. Immutable once a run starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub title: String,
    pub location: String,
    /// Extra query filters (job type, experience level, ...), keyed by the
    /// site's query parameter name.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl SearchCriteria {
    pub fn new(title: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            location: location.into(),
            filters: BTreeMap::new(),
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }
}

/// Kind of page a request targets. Pacing ranges differ per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Search,
    Detail,
}

/// One fetch attempt, created by the sequencer and consumed by a session
/// controller. `attempt` starts at 1 and grows on retry.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub kind: PageKind,
    pub url: String,
    /// Zero-based page index for search requests.
    pub page: Option<u32>,
    /// Target job for detail requests.
    pub job_id: Option<JobId>,
    pub attempt: u32,
}

impl PageRequest {
    pub fn search(url: String, page: u32) -> Self {
        Self {
            kind: PageKind::Search,
            url,
            page: Some(page),
            job_id: None,
            attempt: 1,
        }
    }

    pub fn detail(url: String, job_id: JobId) -> Self {
        Self {
            kind: PageKind::Detail,
            url,
            page: None,
            job_id: Some(job_id),
            attempt: 1,
        }
    }
}

/// Raw fetched page, owned transiently by the extraction pipeline.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
}

/// A structured job listing keyed by its site-native identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub title: String,
    pub company: String,
    pub location: String,
    /// Absolute posting time when the site exposes one.
    pub posted_at: Option<DateTime<Utc>>,
    /// Filled by the detail fetch; None for search-results-only runs.
    pub description: Option<String>,
    pub source_url: String,
    pub first_seen_at: DateTime<Utc>,
}

/// Lifecycle state of a discovered job. Mutated only by the status tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Discovered,
    Fetching,
    Extracted,
    Persisted,
    Failed,
    Abandoned,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Persisted | JobStatus::Abandoned)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Discovered => "discovered",
            JobStatus::Fetching => "fetching",
            JobStatus::Extracted => "extracted",
            JobStatus::Persisted => "persisted",
            JobStatus::Failed => "failed",
            JobStatus::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// End-of-run counts reported to the presentation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Unique jobs discovered during the run.
    pub found: u64,
    pub persisted: u64,
    /// Jobs that entered the Failed state at least once.
    pub failed: u64,
    pub abandoned: u64,
}
