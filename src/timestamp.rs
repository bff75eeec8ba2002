//! Timestamp parsing shared by the store, the sync modes and the CLI
//!
//! The Threads API reports times like `2024-07-01T12:00:00+0000` and accepts
//! `since`/`until` as Unix seconds.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

const API_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Parse a timestamp as produced by the API (or any RFC 3339 string)
pub fn parse_api_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_str(s, API_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Convert a stored timestamp to Unix seconds, accepting purely numeric values too
pub fn to_unix(s: &str) -> Option<i64> {
    parse_api_timestamp(s)
        .map(|dt| dt.timestamp())
        .or_else(|| s.trim().parse::<i64>().ok())
}

/// Format Unix seconds the way the API does
pub fn format_api_timestamp(unix: i64) -> Option<String> {
    Utc.timestamp_opt(unix, 0)
        .single()
        .map(|dt| dt.format(API_FORMAT).to_string())
}

/// Parse a user-supplied time bound into Unix seconds
///
/// Accepts Unix seconds, API/RFC 3339 timestamps, or `YYYY-MM-DD` (UTC midnight).
pub fn parse_time_bound(s: &str) -> Result<i64> {
    if let Some(unix) = to_unix(s) {
        return Ok(unix);
    }

    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp())
        .ok_or_else(|| {
            anyhow!(
                "Invalid time '{}'. Use Unix seconds, 2024-07-01T00:00:00+0000, or 2024-07-01",
                s
            )
        })
}
