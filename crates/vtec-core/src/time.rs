//! # UTC Time Helpers
//!
//! Every time in the engine is `i64` milliseconds since the epoch, UTC.
//! Conversions to calendar fields go through `chrono::Utc` only; there is
//! no local-time arithmetic anywhere in the crate.

use crate::VtecError;
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};

/// Compact VTEC timestamp format, `YYMMDDTHHMMZ`.
const VTEC_TIME_FORMAT: &str = "%y%m%dT%H%MZ";

/// The "undefined/inherit" VTEC timestamp.
pub const ZERO_VTEC_TIME: &str = "000000T0000Z";

fn to_datetime(ms: i64) -> Result<DateTime<Utc>, VtecError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| VtecError::Input(format!("time {} ms is out of range", ms)))
}

/// Calendar year (UTC) of a millisecond timestamp.
///
/// Out-of-range timestamps fall back to year 0 rather than failing; such
/// values never survive input validation.
#[must_use]
pub fn year_of(ms: i64) -> i32 {
    DateTime::from_timestamp_millis(ms).map_or(0, |dt| dt.year())
}

/// Dec 31 23:59Z of the given year, in milliseconds.
pub fn last_minute_of_year(year: i32) -> Result<i64, VtecError> {
    Utc.with_ymd_and_hms(year, 12, 31, 23, 59, 0)
        .single()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| VtecError::Consistency(format!("year {} cannot be represented", year)))
}

/// Format a timestamp as `YYMMDDTHHMMZ`.
pub fn format_vtec_time(ms: i64) -> Result<String, VtecError> {
    Ok(to_datetime(ms)?.format(VTEC_TIME_FORMAT).to_string())
}

/// Parse `YYMMDDTHHMMZ`; `000000T0000Z` yields `None`.
pub fn parse_vtec_time(s: &str) -> Result<Option<i64>, VtecError> {
    if s == ZERO_VTEC_TIME {
        return Ok(None);
    }
    let naive = NaiveDateTime::parse_from_str(s, VTEC_TIME_FORMAT)
        .map_err(|e| VtecError::Input(format!("bad VTEC time '{}': {}", s, e)))?;
    Ok(Some(naive.and_utc().timestamp_millis()))
}

/// Parse an RFC 3339 timestamp (e.g. `2024-01-15T05:10:00Z`) into milliseconds.
pub fn parse_rfc3339(s: &str) -> Result<i64, VtecError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .map_err(|e| VtecError::Input(format!("bad timestamp '{}': {}", s, e)))
}

/// Render milliseconds as RFC 3339 for logs and CLI output.
#[must_use]
pub fn to_rfc3339(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| format!("{}ms", ms))
}

/// Current wall-clock time in milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
