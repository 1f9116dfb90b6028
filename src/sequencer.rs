//! Query sequencer: turns one search into an ordered stream of page requests.
//!
//! Search pages are emitted one at a time because each pagination cursor
//! depends on the previous page's parse. Detail requests and retries queue up
//! in between; retries go to the front so a failed fetch is not starved by
//! newly discovered work.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::ScrapeConfig;
use crate::models::{JobId, PageRequest, SearchCriteria};

#[derive(Debug)]
pub struct QuerySequencer {
    criteria: SearchCriteria,
    base_url: String,
    detail_url_template: String,
    page_size: u32,
    max_pages: u32,
    stall_pages: u32,
    fetch_details: bool,

    /// Zero-based index of the next search page to emit.
    next_page: u32,
    /// Cursor signal from the last parsed page.
    has_more: bool,
    /// Consecutive parsed pages that contributed no new job ids.
    stalled: u32,
    /// A search request is out and its parse has not come back yet.
    search_in_flight: bool,

    pending: VecDeque<PageRequest>,
}

impl QuerySequencer {
    pub fn new(criteria: SearchCriteria, config: &ScrapeConfig) -> Self {
        Self {
            criteria,
            base_url: config.base_url.clone(),
            detail_url_template: config.detail_url_template.clone(),
            page_size: config.page_size,
            max_pages: config.max_pages,
            stall_pages: config.stall_pages,
            fetch_details: config.fetch_details,
            next_page: 0,
            has_more: true,
            stalled: 0,
            search_in_flight: false,
            pending: VecDeque::new(),
        }
    }

    /// Next request to execute, or None when the sequence is exhausted.
    /// Requests come out in submission order within each kind; pending detail
    /// work and retries run before the next search page is opened.
    pub fn next_request(&mut self) -> Option<PageRequest> {
        if let Some(request) = self.pending.pop_front() {
            return Some(request);
        }

        if self.search_in_flight || !self.search_pages_remain() {
            return None;
        }

        let page = self.next_page;
        self.search_in_flight = true;
        Some(PageRequest::search(self.search_url(page), page))
    }

    /// Feed back the outcome of a parsed search page: which job ids were new
    /// and whether the page advertised a next page.
    pub fn on_search_parsed(&mut self, new_ids: &[JobId], has_next: bool) {
        self.search_in_flight = false;
        self.next_page += 1;
        self.has_more = has_next;

        if new_ids.is_empty() {
            self.stalled += 1;
            debug!("Search page contributed no new jobs (stalled={})", self.stalled);
        } else {
            self.stalled = 0;
        }

        if self.fetch_details {
            for id in new_ids {
                let url = self.detail_url_template.replace("{job_id}", id);
                self.pending.push_back(PageRequest::detail(url, id.clone()));
            }
        }
    }

    /// A search page was abandoned; its cursor is lost, so pagination ends.
    pub fn on_search_abandoned(&mut self) {
        self.search_in_flight = false;
        self.has_more = false;
    }

    /// Re-inject a failed request for another attempt.
    pub fn requeue(&mut self, mut request: PageRequest) {
        request.attempt += 1;
        if request.kind == crate::models::PageKind::Search {
            self.search_in_flight = true;
        }
        self.pending.push_front(request);
    }

    /// True once no request will ever be emitted again.
    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty() && !self.search_in_flight && !self.search_pages_remain()
    }

    fn search_pages_remain(&self) -> bool {
        self.has_more && self.next_page < self.max_pages && self.stalled < self.stall_pages
    }

    fn search_url(&self, page: u32) -> String {
        let mut url = format!(
            "{}?keywords={}&location={}",
            self.base_url,
            urlencoding::encode(&self.criteria.title),
            urlencoding::encode(&self.criteria.location),
        );
        for (key, value) in &self.criteria.filters {
            url.push_str(&format!(
                "&{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            ));
        }
        if page > 0 {
            url.push_str(&format!("&start={}", page * self.page_size));
        }
        url
    }
}
