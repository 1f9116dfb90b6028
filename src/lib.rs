//! Job-listing scrape orchestration engine.
//!
//! Drives browser-based fetch sessions against a job board: paginates search
//! results, fetches detail pages, extracts and deduplicates listings, and
//! persists them, while pacing requests and rotating session identities to
//! stay under automated-traffic detection thresholds.

pub mod browser;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod models;
pub mod pacing;
pub mod retry;
pub mod run;
pub mod sequencer;
pub mod session;
pub mod store;
pub mod tracker;

pub use config::ScrapeConfig;
pub use error::{Failure, FetchError, RunError};
pub use models::{JobRecord, JobStatus, RunSummary, SearchCriteria};
pub use run::{RunEvent, ScrapeEngine};
pub use store::{JobStore, MemoryJobStore, SqliteJobStore};
