//! Session controller: owns one browser session, paces every fetch, and
//! rotates identity when thresholds or blocking demand it.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, BrowserSession, PageContent, SessionProfile};
use crate::config::ScrapeConfig;
use crate::error::FetchError;
use crate::models::{PageRequest, RawPage};
use crate::pacing::PacingPolicy;

/// Forced rotation threshold: this many consecutive blocked fetches within
/// one session abandons its identity regardless of the pacing ceilings.
const FORCED_ROTATION_BLOCKS: u32 = 3;

/// Consecutive sessions blocked on their first fetch before the run-level
/// persistent-block condition is raised.
pub const PERSISTENT_BLOCK_SESSIONS: u32 = 3;

/// Mutable state of the current session. Owned exclusively by one
/// controller; never shared.
#[derive(Debug)]
struct SessionState {
    requests_since_rotation: u32,
    opened_at: Instant,
    last_action: Option<Instant>,
    suspicion: u32,
    consecutive_blocked: u32,
    request_ceiling: u32,
    age_limit: std::time::Duration,
}

/// Drives fetches serially through one browser session at a time.
pub struct SessionController {
    driver: Arc<dyn BrowserDriver>,
    pacing: PacingPolicy,
    config: Arc<ScrapeConfig>,
    session: Option<Box<dyn BrowserSession>>,
    state: Option<SessionState>,
    rotations: u64,
    /// Consecutive sessions whose first fetch came back blocked.
    blocked_sessions: u32,
    first_fetch_of_session: bool,
}

impl SessionController {
    pub fn new(driver: Arc<dyn BrowserDriver>, config: Arc<ScrapeConfig>) -> Self {
        let pacing = PacingPolicy::from_config(&config);
        Self {
            driver,
            pacing,
            config,
            session: None,
            state: None,
            rotations: 0,
            blocked_sessions: 0,
            first_fetch_of_session: true,
        }
    }

    /// Open a fresh session with a newly rolled identity fingerprint.
    pub async fn open(&mut self) -> Result<(), FetchError> {
        let profile = SessionProfile::roll(&self.config.browser);
        debug!("Opening session with user agent: {}", profile.user_agent);
        let session = self.driver.open(&profile).await?;
        self.session = Some(session);
        self.state = Some(SessionState {
            requests_since_rotation: 0,
            opened_at: Instant::now(),
            last_action: None,
            suspicion: 0,
            consecutive_blocked: 0,
            request_ceiling: self.pacing.roll_request_ceiling(),
            age_limit: self.pacing.roll_age_limit(),
        });
        self.first_fetch_of_session = true;
        Ok(())
    }

    /// Discard the current session and open a fresh one.
    pub async fn rotate(&mut self) -> Result<(), FetchError> {
        info!("Rotating browser session (rotation #{})", self.rotations + 1);
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        self.rotations += 1;
        self.open().await
    }

    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        self.state = None;
    }

    /// Total rotations performed so far.
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// True when several successive sessions were blocked immediately after
    /// opening: the anti-detection strategy itself has failed.
    pub fn persistently_blocked(&self) -> bool {
        self.blocked_sessions >= PERSISTENT_BLOCK_SESSIONS
    }

    /// Fetch one page. Applies the pacing delay, rotates beforehand when the
    /// session is past its ceilings, and classifies block pages.
    pub async fn fetch(&mut self, request: &PageRequest) -> Result<RawPage, FetchError> {
        if self.session.is_none() {
            self.open().await?;
        } else if self.due_for_rotation() {
            self.rotate().await?;
        }

        let delay = self.pacing.delay_before(request.kind);
        debug!("Pacing delay before {}: {:?}", request.url, delay);
        tokio::time::sleep(delay).await;

        let timeout = self.config.page_timeout();
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| FetchError::Render("no open session".to_string()))?;

        let result = tokio::time::timeout(timeout, session.navigate(&request.url))
            .await
            .map_err(|_| FetchError::Timeout(timeout))?;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| FetchError::Render("no session state".to_string()))?;
        state.requests_since_rotation += 1;
        state.last_action = Some(Instant::now());

        let content = result?;

        if is_blocked_page(&content, &self.config.block_indicators) {
            state.suspicion += 1;
            state.consecutive_blocked += 1;
            warn!(
                "Blocked response for {} (suspicion={}, consecutive={})",
                request.url, state.suspicion, state.consecutive_blocked
            );
            if self.first_fetch_of_session {
                self.blocked_sessions += 1;
            }
            if state.consecutive_blocked >= FORCED_ROTATION_BLOCKS {
                warn!("{} consecutive blocks, forcing rotation", FORCED_ROTATION_BLOCKS);
                self.rotate().await?;
            }
            return Err(FetchError::Blocked);
        }

        state.consecutive_blocked = 0;
        self.blocked_sessions = 0;
        self.first_fetch_of_session = false;

        Ok(RawPage {
            url: content.url,
            final_url: content.final_url,
            status: content.status,
            content: content.body,
            fetched_at: Utc::now(),
        })
    }

    fn due_for_rotation(&self) -> bool {
        match &self.state {
            Some(state) => self.pacing.should_rotate(
                state.requests_since_rotation,
                state.opened_at.elapsed(),
                state.request_ceiling,
                state.age_limit,
            ),
            None => false,
        }
    }
}

/// Block-page classifier. Environment-specific and deliberately tunable via
/// configuration: status codes, challenge redirects, and indicator phrases.
pub fn is_blocked_page(content: &PageContent, indicators: &[String]) -> bool {
    if matches!(content.status, 403 | 429) {
        return true;
    }

    // Redirect to an auth wall or challenge page instead of the listing
    let final_url = content.final_url.to_lowercase();
    if final_url.contains("authwall") || final_url.contains("/challenge") {
        return true;
    }

    let body = content.body.to_lowercase();
    indicators
        .iter()
        .any(|indicator| body.contains(indicator.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(status: u16, final_url: &str, body: &str) -> PageContent {
        PageContent {
            url: "https://example.com/jobs".to_string(),
            final_url: final_url.to_string(),
            status,
            body: body.to_string(),
        }
    }

    fn indicators() -> Vec<String> {
        crate::config::ScrapeConfig::default().block_indicators
    }

    #[test]
    fn test_block_on_status() {
        let p = page(429, "https://example.com/jobs", "<html></html>");
        assert!(is_blocked_page(&p, &indicators()));
    }

    #[test]
    fn test_block_on_challenge_redirect() {
        let p = page(200, "https://example.com/authwall?trk=x", "<html></html>");
        assert!(is_blocked_page(&p, &indicators()));
    }

    #[test]
    fn test_block_on_indicator_phrase() {
        let p = page(
            200,
            "https://example.com/jobs",
            "<html><body>Please complete this security check to continue</body></html>",
        );
        assert!(is_blocked_page(&p, &indicators()));
    }

    #[test]
    fn test_normal_page_not_blocked() {
        let p = page(
            200,
            "https://example.com/jobs",
            "<html><body><ul class=\"jobs-search__results-list\"></ul></body></html>",
        );
        assert!(!is_blocked_page(&p, &indicators()));
    }
}
