//! Posted-date normalization.
//!
//! Listings show relative phrases ("3 days ago"); records carry absolute
//! timestamps so they stay meaningful after the run.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;

fn relative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\s+(minute|hour|day|week|month)s?\s+ago").expect("valid regex")
    })
}

/// Parse a `datetime` attribute value: RFC 3339 or a bare date.
pub fn parse_datetime_attr(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(DateTime::from_naive_utc_and_offset(
            date.and_hms_opt(0, 0, 0)?,
            Utc,
        ));
    }
    None
}

/// Parse a relative posted phrase against `now`.
pub fn parse_posted_phrase(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    if lowered.contains("just now") || lowered.contains("today") {
        return Some(now);
    }
    if lowered.contains("yesterday") {
        return Some(now - Duration::days(1));
    }

    let captures = relative_re().captures(&lowered)?;
    let amount: i64 = captures.get(1)?.as_str().parse().ok()?;
    let delta = match captures.get(2)?.as_str() {
        "minute" => Duration::minutes(amount),
        "hour" => Duration::hours(amount),
        "day" => Duration::days(amount),
        "week" => Duration::weeks(amount),
        // Close enough for ranking; listings older than weeks are vague anyway
        "month" => Duration::days(amount * 30),
        _ => return None,
    };
    Some(now - delta)
}
