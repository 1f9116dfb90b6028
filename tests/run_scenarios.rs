//! End-to-end run scenarios against a scripted browser driver.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use jobharvest::browser::{BrowserDriver, BrowserSession, PageContent, SessionProfile};
use jobharvest::config::{DelayRange, ScrapeConfig};
use jobharvest::error::{FetchError, RunError};
use jobharvest::models::JobStatus;
use jobharvest::store::{JobStore, MemoryJobStore};
use jobharvest::{ScrapeEngine, SearchCriteria};

/// One scripted response per navigation, in order.
enum Step {
    Page { status: u16, html: String },
    Fail(FetchError),
    /// Never resolves; exercises cancellation mid-fetch.
    Hang,
}

fn ok(html: String) -> Step {
    Step::Page { status: 200, html }
}

fn blocked() -> Step {
    Step::Page {
        status: 403,
        html: "<html><body>Access denied</body></html>".to_string(),
    }
}

struct ScriptedDriver {
    steps: Arc<tokio::sync::Mutex<VecDeque<Step>>>,
    opens: Arc<AtomicUsize>,
    navigations: Arc<AtomicUsize>,
}

impl ScriptedDriver {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Arc::new(tokio::sync::Mutex::new(steps.into())),
            opens: Arc::new(AtomicUsize::new(0)),
            navigations: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn open(&self, _profile: &SessionProfile) -> Result<Box<dyn BrowserSession>, FetchError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            steps: self.steps.clone(),
            navigations: self.navigations.clone(),
        }))
    }
}

struct ScriptedSession {
    steps: Arc<tokio::sync::Mutex<VecDeque<Step>>>,
    navigations: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&mut self, url: &str) -> Result<PageContent, FetchError> {
        self.navigations.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().await.pop_front();
        match step {
            Some(Step::Page { status, html }) => Ok(PageContent {
                url: url.to_string(),
                final_url: url.to_string(),
                status,
                body: html,
            }),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Err(FetchError::Network("script exhausted".to_string())),
        }
    }

    async fn close(&mut self) {}
}

/// Defaults with all pacing collapsed so scenarios run instantly.
fn test_config() -> ScrapeConfig {
    let mut config = ScrapeConfig::default();
    config.search_delay = DelayRange::new(0, 0);
    config.detail_delay = DelayRange::new(0, 0);
    config.backoff_base_ms = 1;
    config.page_timeout_secs = 5;
    config
}

fn search_html(ids: &[&str], next: bool) -> String {
    let mut body = String::from("<html><body><ul class=\"jobs-search__results-list\">");
    for id in ids {
        body.push_str(&format!(
            r#"<li data-occludable-job-id="{id}">
                <a class="base-card__full-link" href="https://example.com/jobs/view/{id}">link</a>
                <h3 class="base-search-card__title">Engineer {id}</h3>
                <h4 class="base-search-card__subtitle">Acme Corp</h4>
                <span class="job-search-card__location">Remote</span>
            </li>"#
        ));
    }
    body.push_str("</ul>");
    if next {
        body.push_str(r#"<button aria-label="Next">Next</button>"#);
    }
    body.push_str("</body></html>");
    body
}

fn detail_html(text: &str) -> String {
    format!(
        r#"<html><body>
            <div class="show-more-less-html__markup">{text}</div>
            <span class="posted-time-ago__text">3 days ago</span>
        </body></html>"#
    )
}

fn engine_with(
    config: ScrapeConfig,
    driver: Arc<ScriptedDriver>,
    store: Arc<MemoryJobStore>,
) -> ScrapeEngine {
    ScrapeEngine::new(Arc::new(config), driver, store)
}

#[tokio::test]
async fn test_paginated_search_dedups_across_pages() {
    let mut config = test_config();
    config.fetch_details = false;

    let driver = Arc::new(ScriptedDriver::new(vec![
        ok(search_html(&["101", "102", "103"], true)),
        // 103 repeats on page two; only 104 is new
        ok(search_html(&["103", "104"], false)),
    ]));
    let store = Arc::new(MemoryJobStore::new());
    let engine = engine_with(config, driver.clone(), store.clone());

    let summary = engine
        .run(SearchCriteria::new("engineer", "remote"))
        .await
        .unwrap();

    assert_eq!(summary.found, 4);
    assert_eq!(summary.persisted, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.abandoned, 0);
    assert_eq!(store.len().await, 4);
    // Two search fetches, no detail fetches, one session
    assert_eq!(driver.navigations(), 2);
    assert_eq!(driver.opens(), 1);
}

#[tokio::test]
async fn test_detail_fetch_completes_records() {
    let config = test_config();
    let driver = Arc::new(ScriptedDriver::new(vec![
        ok(search_html(&["101", "102"], false)),
        ok(detail_html("Build distributed systems.")),
        ok(detail_html("Maintain data pipelines.")),
    ]));
    let store = Arc::new(MemoryJobStore::new());
    let engine = engine_with(config, driver.clone(), store.clone());

    let summary = engine
        .run(SearchCriteria::new("engineer", "remote"))
        .await
        .unwrap();

    assert_eq!(summary.found, 2);
    assert_eq!(summary.persisted, 2);
    assert_eq!(driver.navigations(), 3);

    let records = store.records().await;
    assert!(records.iter().all(|r| r.description.is_some()));
    assert!(records.iter().all(|r| r.posted_at.is_some()));
}

#[tokio::test]
async fn test_paginated_search_fetches_details_once_per_unique_job() {
    let config = test_config();
    // Page two repeats 103; its detail page must not be fetched again
    let driver = Arc::new(ScriptedDriver::new(vec![
        ok(search_html(&["101", "102", "103"], true)),
        ok(detail_html("Role 101.")),
        ok(detail_html("Role 102.")),
        ok(detail_html("Role 103.")),
        ok(search_html(&["103", "104"], false)),
        ok(detail_html("Role 104.")),
    ]));
    let store = Arc::new(MemoryJobStore::new());
    let engine = engine_with(config, driver.clone(), store.clone());

    let summary = engine
        .run(SearchCriteria::new("engineer", "remote"))
        .await
        .unwrap();

    // Two searches plus exactly four detail fetches
    assert_eq!(driver.navigations(), 6);
    assert_eq!(summary.found, 4);
    assert_eq!(summary.persisted, 4);
    assert_eq!(store.len().await, 4);
    let records = store.records().await;
    assert!(records.iter().all(|r| r.description.is_some()));
}

#[tokio::test]
async fn test_known_ids_not_refetched() {
    let mut config = test_config();
    config.fetch_details = false;

    let driver = Arc::new(ScriptedDriver::new(vec![ok(search_html(
        &["101", "102"],
        false,
    ))]));
    let store = Arc::new(MemoryJobStore::new());
    store
        .write(&jobharvest::JobRecord {
            job_id: "101".to_string(),
            title: "Engineer 101".to_string(),
            company: "Acme Corp".to_string(),
            location: "Remote".to_string(),
            posted_at: None,
            description: None,
            source_url: "https://example.com/jobs/view/101".to_string(),
            first_seen_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let engine = engine_with(config, driver.clone(), store.clone());
    let summary = engine
        .run(SearchCriteria::new("engineer", "remote"))
        .await
        .unwrap();

    // 101 was seeded from the store, so only 102 counts as found
    assert_eq!(summary.found, 1);
    assert_eq!(summary.persisted, 1);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn test_transient_search_failure_is_retried() {
    let mut config = test_config();
    config.fetch_details = false;

    let driver = Arc::new(ScriptedDriver::new(vec![
        Step::Fail(FetchError::Network("connection reset".to_string())),
        ok(search_html(&["101"], false)),
    ]));
    let store = Arc::new(MemoryJobStore::new());
    let engine = engine_with(config, driver.clone(), store.clone());

    let summary = engine
        .run(SearchCriteria::new("engineer", "remote"))
        .await
        .unwrap();

    assert_eq!(summary.found, 1);
    assert_eq!(summary.persisted, 1);
    assert_eq!(driver.navigations(), 2);
    // Transient network failures retry on the same session
    assert_eq!(driver.opens(), 1);
}

#[tokio::test]
async fn test_blocked_detail_rotates_then_abandons() {
    let config = test_config();
    let driver = Arc::new(ScriptedDriver::new(vec![
        ok(search_html(&["101"], false)),
        blocked(),
        blocked(),
        blocked(),
    ]));
    let store = Arc::new(MemoryJobStore::new());
    let engine = engine_with(config, driver.clone(), store.clone());
    let tracker = engine.tracker();

    let summary = engine
        .run(SearchCriteria::new("engineer", "remote"))
        .await
        .unwrap();

    // Each blocked attempt rotates to a fresh identity before retrying
    assert_eq!(driver.opens(), 3);
    assert_eq!(summary.found, 1);
    assert_eq!(summary.persisted, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.abandoned, 1);
    assert_eq!(
        tracker.query_status("101").await,
        Some(JobStatus::Abandoned)
    );
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_persistent_block_aborts_run() {
    let config = test_config();
    // Every fresh session is blocked on its very first fetch
    let driver = Arc::new(ScriptedDriver::new(vec![blocked(), blocked(), blocked()]));
    let store = Arc::new(MemoryJobStore::new());
    let engine = engine_with(config, driver.clone(), store.clone());

    let result = engine.run(SearchCriteria::new("engineer", "remote")).await;
    assert!(matches!(result, Err(RunError::PersistentBlock(_))));
    assert_eq!(driver.opens(), 3);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_cancellation_abandons_in_flight_jobs() {
    let config = test_config();
    let driver = Arc::new(ScriptedDriver::new(vec![
        ok(search_html(&["101", "102"], false)),
        Step::Hang,
    ]));
    let store = Arc::new(MemoryJobStore::new());
    let engine = Arc::new(engine_with(config, driver.clone(), store.clone()));
    let tracker = engine.tracker();

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(SearchCriteria::new("engineer", "remote")).await })
    };

    // Let the run reach the hanging detail fetch, then cancel
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.cancel();
    let summary = runner.await.unwrap().unwrap();

    assert_eq!(summary.found, 2);
    assert_eq!(summary.persisted, 0);
    assert_eq!(summary.abandoned, 2);
    assert_eq!(
        tracker.query_status("101").await,
        Some(JobStatus::Abandoned)
    );
    assert_eq!(
        tracker.query_status("102").await,
        Some(JobStatus::Abandoned)
    );
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_cancel_interrupts_retry_backoff() {
    let mut config = test_config();
    config.fetch_details = false;
    // A backoff long enough that only a cancelled sleep can finish the test
    config.backoff_base_ms = 10_000;

    let driver = Arc::new(ScriptedDriver::new(vec![Step::Fail(FetchError::Network(
        "connection reset".to_string(),
    ))]));
    let store = Arc::new(MemoryJobStore::new());
    let engine = Arc::new(engine_with(config, driver, store));

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(SearchCriteria::new("engineer", "remote")).await })
    };

    // Let the run enter the backoff sleep, then cancel
    tokio::time::sleep(Duration::from_millis(200)).await;
    let cancelled_at = std::time::Instant::now();
    engine.cancel();
    let summary = runner.await.unwrap().unwrap();

    assert!(
        cancelled_at.elapsed() < Duration::from_secs(2),
        "cancel during backoff took {:?}",
        cancelled_at.elapsed()
    );
    assert_eq!(summary.found, 0);
}

#[tokio::test]
async fn test_cancel_interrupts_store_retry() {
    let mut config = test_config();
    config.fetch_details = false;
    config.backoff_base_ms = 10_000;

    let driver = Arc::new(ScriptedDriver::new(vec![ok(search_html(&["101"], false))]));
    let store = Arc::new(MemoryJobStore::rejecting(vec!["101".to_string()]));
    let engine = Arc::new(engine_with(config, driver, store.clone()));
    let tracker = engine.tracker();

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(SearchCriteria::new("engineer", "remote")).await })
    };

    // Let the rejected write enter its backoff, then cancel
    tokio::time::sleep(Duration::from_millis(200)).await;
    let cancelled_at = std::time::Instant::now();
    engine.cancel();
    let summary = runner.await.unwrap().unwrap();

    assert!(
        cancelled_at.elapsed() < Duration::from_secs(2),
        "cancel during store retry took {:?}",
        cancelled_at.elapsed()
    );
    assert_eq!(summary.found, 1);
    assert_eq!(summary.abandoned, 1);
    assert_eq!(
        tracker.query_status("101").await,
        Some(JobStatus::Abandoned)
    );
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_single_store_rejection_still_counts_failed() {
    let mut config = test_config();
    config.fetch_details = false;

    let driver = Arc::new(ScriptedDriver::new(vec![ok(search_html(&["101"], false))]));
    let store = Arc::new(MemoryJobStore::rejecting_once(vec!["101".to_string()]));
    let engine = engine_with(config, driver, store.clone());
    let tracker = engine.tracker();

    let summary = engine
        .run(SearchCriteria::new("engineer", "remote"))
        .await
        .unwrap();

    // Persisted on the second write, but the rejection shows in the tally
    assert_eq!(summary.found, 1);
    assert_eq!(summary.persisted, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.abandoned, 0);
    assert_eq!(store.len().await, 1);
    assert_eq!(
        tracker.query_status("101").await,
        Some(JobStatus::Persisted)
    );
}

#[tokio::test]
async fn test_store_rejection_abandons_after_budget() {
    let mut config = test_config();
    config.fetch_details = false;

    let driver = Arc::new(ScriptedDriver::new(vec![ok(search_html(
        &["101", "102"],
        false,
    ))]));
    let store = Arc::new(MemoryJobStore::rejecting(vec!["101".to_string()]));
    let engine = engine_with(config, driver, store.clone());
    let tracker = engine.tracker();

    let summary = engine
        .run(SearchCriteria::new("engineer", "remote"))
        .await
        .unwrap();

    assert_eq!(summary.found, 2);
    assert_eq!(summary.persisted, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.abandoned, 1);
    assert_eq!(
        tracker.query_status("101").await,
        Some(JobStatus::Abandoned)
    );
    assert_eq!(
        tracker.query_status("102").await,
        Some(JobStatus::Persisted)
    );
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_malformed_search_page_retried_then_abandoned() {
    let mut config = test_config();
    config.fetch_details = false;

    // Three malformed responses exhaust the attempt budget
    let garbage = || ok("<html><body><p>maintenance</p></body></html>".to_string());
    let driver = Arc::new(ScriptedDriver::new(vec![garbage(), garbage(), garbage()]));
    let store = Arc::new(MemoryJobStore::new());
    let engine = engine_with(config, driver.clone(), store.clone());

    let summary = engine
        .run(SearchCriteria::new("engineer", "remote"))
        .await
        .unwrap();

    assert_eq!(driver.navigations(), 3);
    assert_eq!(summary.found, 0);
    assert!(store.is_empty().await);
}
