//! Per-session identity fingerprints.

use rand::seq::SliceRandom;

use crate::config::BrowserSettings;

/// Identity used for one browser session. A fresh profile is rolled at every
/// session open so rotation actually changes the observable fingerprint.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub user_agent: String,
    pub viewport: (u32, u32),
}

/// Common desktop viewport sizes; a constant window size across rotations
/// would tie sessions together.
const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1680, 1050), (1536, 864), (1440, 900)];

impl SessionProfile {
    /// Roll a random profile from the configured user-agent pool.
    pub fn roll(settings: &BrowserSettings) -> Self {
        let mut rng = rand::thread_rng();
        let user_agent = settings
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| {
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                 Chrome/130.0.0.0 Safari/537.36"
                    .to_string()
            });
        let viewport = VIEWPORTS.choose(&mut rng).copied().unwrap_or((1920, 1080));
        Self {
            user_agent,
            viewport,
        }
    }
}
