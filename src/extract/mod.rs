//! Extraction pipeline: raw page content to structured job records.
//!
//! The target site's markup shifts between layouts, so every field is
//! extracted through a fallback selector list, mirroring how the site has
//! historically renamed its classes.

mod dates;
mod dedup;

pub use dates::{parse_datetime_attr, parse_posted_phrase};
pub use dedup::DedupSet;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::ExtractError;
use crate::models::JobRecord;

/// Parsed search page: partial records plus a pagination signal.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub jobs: Vec<JobRecord>,
    /// Whether the page advertises a further page of results.
    pub has_next: bool,
}

/// Completion fields recovered from a detail page.
#[derive(Debug, Clone)]
pub struct JobDetail {
    pub description: String,
    pub posted_at: Option<DateTime<Utc>>,
}

const RESULT_CONTAINER_SELECTORS: &[&str] = &[
    ".jobs-search__results-list",
    ".scaffold-layout__list-container",
    ".jobs-search-results-list",
];

const JOB_CARD_SELECTORS: &[&str] = &[
    "li[data-occludable-job-id]",
    "div[data-entity-urn]",
    ".job-search-card",
    ".base-search-card",
];

const TITLE_SELECTORS: &[&str] = &["h3.base-search-card__title", ".job-search-card__title", "h3"];

const COMPANY_SELECTORS: &[&str] = &[
    "h4.base-search-card__subtitle",
    "a.hidden-nested-link",
    ".job-search-card__subtitle",
    "h4",
];

const LOCATION_SELECTORS: &[&str] = &[
    ".job-search-card__location",
    ".base-search-card__metadata span",
];

const LINK_SELECTORS: &[&str] = &["a.base-card__full-link", "a[href*=\"/jobs/view/\"]", "a[href]"];

const DESCRIPTION_SELECTORS: &[&str] = &[
    ".show-more-less-html__markup",
    ".description__text",
    ".jobs-description__content",
    "#job-details",
];

const END_OF_RESULTS_MARKERS: &[&str] = &["no matching jobs found", "0 results"];

/// Parse a search results page into partial job records.
///
/// A page without a results container, job cards, or an explicit
/// end-of-results marker is malformed: the site served something other than
/// a listing page.
pub fn parse_search_page(html: &str, now: DateTime<Utc>) -> Result<SearchPage, ExtractError> {
    let document = Html::parse_document(html);

    let cards = find_job_cards(&document);
    if cards.is_empty() {
        let lowered = html.to_lowercase();
        let ended = END_OF_RESULTS_MARKERS.iter().any(|m| lowered.contains(m));
        if ended {
            return Ok(SearchPage {
                jobs: Vec::new(),
                has_next: false,
            });
        }
        if !has_any(&document, RESULT_CONTAINER_SELECTORS) {
            return Err(ExtractError::Malformed(
                "no results container or job cards".to_string(),
            ));
        }
        // Container present but empty: a valid zero-result page
        return Ok(SearchPage {
            jobs: Vec::new(),
            has_next: false,
        });
    }

    let mut jobs = Vec::new();
    for card in &cards {
        if let Some(record) = extract_job_card(card, now) {
            jobs.push(record);
        }
    }
    debug!("Extracted {} of {} job cards", jobs.len(), cards.len());

    Ok(SearchPage {
        jobs,
        has_next: has_next_page(&document),
    })
}

/// Parse a detail page for one job's completion fields.
pub fn parse_detail_page(html: &str, now: DateTime<Utc>) -> Result<JobDetail, ExtractError> {
    let document = Html::parse_document(html);

    let description = select_text(&document.root_element(), DESCRIPTION_SELECTORS)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| ExtractError::Malformed("no description container".to_string()))?;

    let posted_at = select_posted_at(&document.root_element(), now);

    Ok(JobDetail {
        description,
        posted_at,
    })
}

fn has_any(document: &Html, selectors: &[&str]) -> bool {
    selectors.iter().any(|selector_str| {
        Selector::parse(selector_str)
            .map(|selector| document.select(&selector).next().is_some())
            .unwrap_or(false)
    })
}

fn find_job_cards(document: &Html) -> Vec<ElementRef<'_>> {
    for selector_str in JOB_CARD_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            let cards: Vec<ElementRef<'_>> = document.select(&selector).collect();
            if !cards.is_empty() {
                return cards;
            }
        }
    }
    Vec::new()
}

fn extract_job_card(card: &ElementRef<'_>, now: DateTime<Utc>) -> Option<JobRecord> {
    let source_url = extract_link(card)?;
    let job_id = extract_job_id(card, &source_url)?;

    let title = select_text(card, TITLE_SELECTORS)?;
    if title.is_empty() {
        return None;
    }
    let company = select_text(card, COMPANY_SELECTORS).unwrap_or_default();
    let location = select_text(card, LOCATION_SELECTORS).unwrap_or_default();
    let posted_at = select_posted_at(card, now);

    Some(JobRecord {
        job_id,
        title,
        company,
        location,
        posted_at,
        description: None,
        source_url,
        first_seen_at: now,
    })
}

/// Job id from card attributes, falling back to the listing URL.
fn extract_job_id(card: &ElementRef<'_>, url: &str) -> Option<String> {
    if let Some(id) = card.value().attr("data-occludable-job-id") {
        return Some(id.to_string());
    }
    // data-entity-urn="urn:li:jobPosting:123456"
    if let Some(urn) = card.value().attr("data-entity-urn") {
        if let Some(id) = urn.rsplit(':').next() {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    // .../jobs/view/123456?refId=...
    if let Some(tail) = url.split("/jobs/view/").nth(1) {
        let id: String = tail
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        if !id.is_empty() {
            return Some(id);
        }
    }
    None
}

fn extract_link(card: &ElementRef<'_>) -> Option<String> {
    for selector_str in LINK_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(href) = card
                .select(&selector)
                .filter_map(|a| a.value().attr("href"))
                .next()
            {
                return Some(href.to_string());
            }
        }
    }
    None
}

fn has_next_page(document: &Html) -> bool {
    for selector_str in &[
        "button[aria-label=\"Next\"]",
        ".artdeco-pagination__button--next",
        "a[aria-label=\"Next\"]",
    ] {
        if let Ok(selector) = Selector::parse(selector_str) {
            for button in document.select(&selector) {
                let disabled = button.value().attr("disabled").is_some()
                    || button
                        .value()
                        .attr("class")
                        .map(|c| c.contains("disabled"))
                        .unwrap_or(false);
                if !disabled {
                    return true;
                }
            }
        }
    }
    false
}

/// First non-empty text under any of the given selectors, whitespace-normalized.
fn select_text(scope: &ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    for selector_str in selectors {
        if let Ok(selector) = Selector::parse(selector_str) {
            for element in scope.select(&selector) {
                let text = clean_text(&element.text().collect::<Vec<_>>().join(" "));
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
    }
    None
}

fn select_posted_at(scope: &ElementRef<'_>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Ok(selector) = Selector::parse("time") {
        for element in scope.select(&selector) {
            if let Some(attr) = element.value().attr("datetime") {
                if let Some(parsed) = parse_datetime_attr(attr) {
                    return Some(parsed);
                }
            }
            let text = clean_text(&element.text().collect::<Vec<_>>().join(" "));
            if let Some(parsed) = parse_posted_phrase(&text, now) {
                return Some(parsed);
            }
        }
    }
    // Sites sometimes render the phrase outside a <time> element
    if let Some(text) = select_text(scope, &[".posted-time-ago__text", ".job-posted-date"]) {
        return parse_posted_phrase(&text, now);
    }
    None
}

fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn search_html(cards: &[(&str, &str)], next: bool) -> String {
        let mut body = String::from("<html><body><ul class=\"jobs-search__results-list\">");
        for (id, title) in cards {
            body.push_str(&format!(
                r#"<li data-occludable-job-id="{id}">
                    <a class="base-card__full-link" href="https://example.com/jobs/view/{id}">link</a>
                    <h3 class="base-search-card__title">{title}</h3>
                    <h4 class="base-search-card__subtitle">Acme Corp</h4>
                    <span class="job-search-card__location">Remote</span>
                    <time datetime="2026-08-20">5 days ago</time>
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

    #[test]
    fn test_parse_search_page_extracts_records() {
        let html = search_html(&[("101", "Engineer"), ("102", "Senior Engineer")], true);
        let page = parse_search_page(&html, now()).unwrap();
        assert_eq!(page.jobs.len(), 2);
        assert!(page.has_next);

        let first = &page.jobs[0];
        assert_eq!(first.job_id, "101");
        assert_eq!(first.title, "Engineer");
        assert_eq!(first.company, "Acme Corp");
        assert_eq!(first.location, "Remote");
        assert_eq!(first.source_url, "https://example.com/jobs/view/101");
        assert!(first.posted_at.is_some());
        assert!(first.description.is_none());
    }

    #[test]
    fn test_parse_search_page_no_next_button() {
        let html = search_html(&[("101", "Engineer")], false);
        let page = parse_search_page(&html, now()).unwrap();
        assert!(!page.has_next);
    }

    #[test]
    fn test_parse_search_page_idempotent_content() {
        let html = search_html(&[("7", "Analyst")], false);
        let a = parse_search_page(&html, now()).unwrap();
        let b = parse_search_page(&html, now()).unwrap();
        assert_eq!(a.jobs[0].job_id, b.jobs[0].job_id);
    }

    #[test]
    fn test_parse_search_page_malformed() {
        let err = parse_search_page("<html><body><p>hello</p></body></html>", now()).unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }

    #[test]
    fn test_parse_search_page_end_of_results() {
        let html = "<html><body><p>No matching jobs found</p></body></html>";
        let page = parse_search_page(html, now()).unwrap();
        assert!(page.jobs.is_empty());
        assert!(!page.has_next);
    }

    #[test]
    fn test_parse_search_page_empty_container() {
        let html = r#"<html><body><ul class="jobs-search__results-list"></ul></body></html>"#;
        let page = parse_search_page(html, now()).unwrap();
        assert!(page.jobs.is_empty());
        assert!(!page.has_next);
    }

    #[test]
    fn test_job_id_from_entity_urn() {
        let html = r#"<html><body><ul class="jobs-search__results-list">
            <div data-entity-urn="urn:li:jobPosting:424242">
                <a href="https://example.com/jobs/view/424242">x</a>
                <h3>Backend Engineer</h3>
            </div>
        </ul></body></html>"#;
        let page = parse_search_page(html, now()).unwrap();
        assert_eq!(page.jobs[0].job_id, "424242");
    }

    #[test]
    fn test_parse_detail_page() {
        let html = r#"<html><body>
            <div class="show-more-less-html__markup">
                We are looking for a systems engineer.
            </div>
            <span class="posted-time-ago__text">2 weeks ago</span>
        </body></html>"#;
        let detail = parse_detail_page(html, now()).unwrap();
        assert!(detail.description.contains("systems engineer"));
        assert!(detail.posted_at.is_some());
    }

    #[test]
    fn test_parse_detail_page_malformed() {
        let err = parse_detail_page("<html><body></body></html>", now()).unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }
}
