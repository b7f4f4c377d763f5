//! Small helpers.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Print first two chars, then mask the rest (for logs only).
pub fn mask_user(u: &str) -> String {
    let mut cs = u.chars();
    let a = cs.next().unwrap_or('*');
    let b = cs.next().unwrap_or('*');
    format!("{}{}****", a, b)
}

/// Calendar date of a brokerage timestamp such as `2024-01-08T14:30:00.123456Z`.
/// The date is taken in the timestamp's own offset, not shifted to local time.
pub fn timestamp_date(s: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    // Some endpoints drop the zone designator
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.date())
}

pub fn parse_day(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}
