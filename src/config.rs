//! Engine configuration, loaded from TOML with serde defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::PageKind;

/// Bounded random delay range in milliseconds. Delays are always drawn
/// uniformly from `[min_ms, max_ms]`; a fixed cadence is itself a detection
/// signal, so single-point ranges should only appear in tests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

/// Browser engine options, passed through to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Run in headless mode (default: true).
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Proxy server URL (e.g. "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// User agents to rotate through. One is picked at random per session.
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            proxy: None,
            chrome_args: Vec::new(),
            user_agents: default_user_agents(),
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Search endpoint the sequencer builds page URLs from.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Template for per-listing detail URLs; `{job_id}` is substituted.
    #[serde(default = "default_detail_url_template")]
    pub detail_url_template: String,

    /// Maximum search pages per run.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Listings per search page, used to compute pagination offsets.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Maximum attempts per page request before abandoning it.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Stop paginating after this many consecutive pages with no new jobs.
    #[serde(default = "default_stall_pages")]
    pub stall_pages: u32,

    /// Fetch per-listing detail pages. Disable for faster, partial records.
    #[serde(default = "default_true")]
    pub fetch_details: bool,

    /// Bounded wait for any single page load.
    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,

    /// Delay range before search page fetches.
    #[serde(default = "default_search_delay")]
    pub search_delay: DelayRange,

    /// Delay range before detail page fetches (shorter than search).
    #[serde(default = "default_detail_delay")]
    pub detail_delay: DelayRange,

    /// Base delay for exponential retry backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Per-session request ceiling is drawn from this range at session open,
    /// so the rotation cadence is not fingerprintable.
    #[serde(default = "default_rotation_requests")]
    pub rotation_requests: DelayRange,

    /// Maximum session age before rotation.
    #[serde(default = "default_session_max_age")]
    pub session_max_age_secs: u64,

    /// Substrings that classify a page as a block/challenge page.
    #[serde(default = "default_block_indicators")]
    pub block_indicators: Vec<String>,

    #[serde(default)]
    pub browser: BrowserSettings,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        // serde defaults and Default must agree; round-trip through an empty
        // table keeps them from drifting apart.
        toml::from_str("").expect("empty config must deserialize")
    }
}

impl ScrapeConfig {
    /// Load configuration from a TOML file, or defaults when `path` is None.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)?;
                let config = toml::from_str(&raw)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn delay_range(&self, kind: PageKind) -> DelayRange {
        match kind {
            PageKind::Search => self.search_delay,
            PageKind::Detail => self.detail_delay,
        }
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

fn default_base_url() -> String {
    "https://www.linkedin.com/jobs/search".to_string()
}

fn default_detail_url_template() -> String {
    "https://www.linkedin.com/jobs/view/{job_id}".to_string()
}

fn default_max_pages() -> u32 {
    3
}

fn default_page_size() -> u32 {
    25
}

fn default_max_attempts() -> u32 {
    3
}

fn default_stall_pages() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_page_timeout() -> u64 {
    30
}

fn default_search_delay() -> DelayRange {
    DelayRange::new(3_000, 5_000)
}

fn default_detail_delay() -> DelayRange {
    DelayRange::new(2_000, 4_000)
}

fn default_backoff_base_ms() -> u64 {
    3_000
}

fn default_rotation_requests() -> DelayRange {
    // Not a delay, but the same bounded-range shape: requests per session.
    DelayRange::new(60, 100)
}

fn default_session_max_age() -> u64 {
    3_600
}

fn default_block_indicators() -> Vec<String> {
    [
        "captcha",
        "rate limit",
        "too many requests",
        "access denied",
        "security check",
        "unusual activity",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn default_headless() -> bool {
    true
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:132.0) Gecko/20100101 Firefox/132.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
