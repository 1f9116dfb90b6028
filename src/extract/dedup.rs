//! Run-scoped deduplication of job identifiers.

use std::collections::HashSet;

use tokio::sync::Mutex;

use crate::models::JobId;

/// Job ids already discovered in the current run. Shared across session
/// controllers; the check-then-insert happens under one lock so concurrent
/// extraction results cannot both claim the same id.
#[derive(Debug, Default)]
pub struct DedupSet {
    seen: Mutex<HashSet<JobId>>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with ids known from the persistent store.
    pub async fn seed<I: IntoIterator<Item = JobId>>(&self, ids: I) {
        let mut seen = self.seen.lock().await;
        seen.extend(ids);
    }

    /// Claim an id. Returns true if it was new; false means drop the record.
    pub async fn insert(&self, id: &str) -> bool {
        let mut seen = self.seen.lock().await;
        seen.insert(id.to_string())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.seen.lock().await.contains(id)
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.seen.lock().await.is_empty()
    }
}
