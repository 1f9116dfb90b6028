//! Browser-automation driver boundary.
//!
//! The engine treats the browser as an opaque capability: open a session
//! with an identity fingerprint, navigate and get rendered content, close.
//! The chromiumoxide-backed implementation lives behind the `browser`
//! feature; tests use scripted drivers.

mod profile;

#[cfg(feature = "browser")]
mod chromium;

#[cfg(feature = "browser")]
pub use chromium::ChromiumDriver;
pub use profile::SessionProfile;

use async_trait::async_trait;

use crate::error::FetchError;

/// Rendered page content returned by a navigation.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub url: String,
    /// URL after redirects; an abnormal redirect is a blocking signal.
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

/// Opens browser sessions. One driver can serve many sequential sessions.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open(&self, profile: &SessionProfile) -> Result<Box<dyn BrowserSession>, FetchError>;
}

/// One continuous browser identity (cookies, fingerprint). Not shareable
/// across concurrent requests; the session controller drives it serially.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<PageContent, FetchError>;

    /// Discard the session. Errors during teardown are not interesting.
    async fn close(&mut self);
}
