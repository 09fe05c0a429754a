//! Database utility functions.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Timezone-less layouts that show up in SQLite columns: the default
/// `datetime()` output and ISO 8601 without an offset. Both are read as
/// UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parse a stored timestamp, preferring RFC3339 and falling back to the
/// naive SQLite layouts. The RFC3339 error is returned when nothing
/// matches.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(rfc3339_err) => NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
            .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
            .ok_or(rfc3339_err),
    }
}
