//! Chromium-backed browser driver (CDP via chromiumoxide).
//!
//! Launches Chrome with automation-hiding arguments and overrides the user
//! agent per session, so a rotated session presents a fresh fingerprint.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{BrowserDriver, BrowserSession, PageContent, SessionProfile};
use crate::config::BrowserSettings;
use crate::error::FetchError;

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

/// JavaScript to wait for page ready state.
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

/// Driver that launches a fresh Chrome instance per session.
pub struct ChromiumDriver {
    settings: BrowserSettings,
    page_timeout: Duration,
}

impl ChromiumDriver {
    pub fn new(settings: BrowserSettings, page_timeout: Duration) -> Self {
        Self {
            settings,
            page_timeout,
        }
    }

    fn find_chrome() -> Result<std::path::PathBuf, FetchError> {
        for path in CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(std::path::PathBuf::from(path));
                    }
                }
            }
        }

        Err(FetchError::Render(
            "Chrome/Chromium not found; install chromium or google-chrome".to_string(),
        ))
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn open(&self, profile: &SessionProfile) -> Result<Box<dyn BrowserSession>, FetchError> {
        info!(
            "Launching browser session (headless={}, viewport={}x{})",
            self.settings.headless, profile.viewport.0, profile.viewport.1
        );

        let chrome_path = Self::find_chrome()?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(profile.viewport.0, profile.viewport.1);

        // with_head means NOT headless, confusingly
        if !self.settings.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = self.settings.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &self.settings.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| FetchError::Render(format!("browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Render(format!("browser launch: {}", e)))?;

        // Drive the CDP event loop until the browser goes away
        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(Box::new(ChromiumSession {
            browser: Some(browser),
            user_agent: profile.user_agent.clone(),
            timeout: self.page_timeout,
        }))
    }
}

/// One launched Chrome instance with a fixed identity.
pub struct ChromiumSession {
    browser: Option<Browser>,
    user_agent: String,
    timeout: Duration,
}

impl ChromiumSession {
    async fn navigate_inner(&self, page: &Page, url: &str) -> Result<PageContent, FetchError> {
        // Override user agent before any navigation
        page.execute(SetUserAgentOverrideParams::new(self.user_agent.clone()))
            .await
            .map_err(|e| FetchError::Render(format!("user agent override: {}", e)))?;

        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| FetchError::Network(format!("invalid url {}: {}", url, e)))?;

        debug!("Navigating to {}", url);
        tokio::time::timeout(self.timeout, page.execute(nav_params))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
            .map_err(|e| FetchError::Network(format!("navigation failed for {}: {}", url, e)))?;

        // Wait for the document to settle; dynamic listings render after load
        match tokio::time::timeout(
            self.timeout,
            page.evaluate(WAIT_FOR_READY_SCRIPT.to_string()),
        )
        .await
        {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state"),
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        let final_url = page
            .url()
            .await
            .map_err(|e| FetchError::Render(format!("final url: {}", e)))?
            .map(|u| u.to_string())
            .unwrap_or_else(|| url.to_string());

        let body = page
            .content()
            .await
            .map_err(|e| FetchError::Render(format!("page content: {}", e)))?;

        Ok(PageContent {
            url: url.to_string(),
            final_url,
            // CDP does not expose the document status without network
            // interception; block pages are classified from content instead.
            status: 200,
            body,
        })
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<PageContent, FetchError> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| FetchError::Render("session already closed".to_string()))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Render(format!("new page: {}", e)))?;

        // Inner function so the page is always closed
        let result = self.navigate_inner(&page, url).await;
        let _ = page.close().await;
        result
    }

    async fn close(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            let _ = browser.close().await;
        }
    }
}
