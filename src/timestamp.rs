//! Canonical timestamp handling
//!
//! Log records are persisted with timestamps in a single canonical form,
//! RFC3339 in UTC with fixed-width fields (`2024-01-01T10:00:00.000000Z`).
//! Because every field is zero padded and the offset is always `Z`, plain
//! string comparison in the store orders records chronologically. Anything
//! that is compared against stored timestamps (cursors, window bounds) must
//! pass through [`canonicalize`] or [`format_canonical`] first.

use chrono::{DateTime, NaiveDateTime, Utc};

const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a timestamp string.
///
/// Accepts RFC3339 with any offset, or a naive ISO-8601 date-time (with `T` or
/// a space as separator) which is interpreted as UTC.
pub fn parse(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_canonical(dt: &DateTime<Utc>) -> String {
    dt.format(CANONICAL_FORMAT).to_string()
}

/// Parse and re-render a timestamp in canonical form.
pub fn canonicalize(input: &str) -> Option<String> {
    parse(input).map(|dt| format_canonical(&dt))
}
