//! Timestamp parsing and canonical rendering for dataset rows.
//!
//! Source exports carry a mix of RFC 3339 strings, space-separated
//! offset strings, and naive local timestamps. Everything is normalized
//! to epoch milliseconds UTC at the crate boundary; naive values are
//! localized in a caller-supplied timezone and rejected when the local
//! clock makes them ambiguous or nonexistent.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Render format shared by every datetime cell the crate emits.
pub const DATETIME_SECOND_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("unparseable timestamp value '{0}'")]
    Unparseable(String),
    #[error("timestamp '{value}' is ambiguous in timezone {tz}")]
    AmbiguousLocal { value: String, tz: String },
    #[error("timestamp '{value}' does not exist in timezone {tz}")]
    NonexistentLocal { value: String, tz: String },
    #[error("invalid UTC timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Parses one timestamp cell into epoch milliseconds UTC.
///
/// Accepted forms, tried in order:
/// - RFC 3339 (`2023-06-15T10:00:00Z`, offsets, fractional seconds)
/// - `YYYY-MM-DD HH:MM:SS±HH:MM` (colon in the offset optional)
/// - naive `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS`, with
///   optional fractional seconds, localized in `naive_tz`
/// - bare `YYYY-MM-DD`, read as local midnight in `naive_tz`
pub fn parse_utc_timestamp(raw: &str, naive_tz: Tz) -> Result<i64, TimestampError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TimestampError::Unparseable(raw.to_string()));
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.timestamp_millis());
    }
    if let Ok(parsed) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%#z") {
        return Ok(parsed.timestamp_millis());
    }

    let naive = parse_naive(trimmed)
        .ok_or_else(|| TimestampError::Unparseable(trimmed.to_string()))?;
    localize(naive, naive_tz, trimmed)
}

fn parse_naive(trimmed: &str) -> Option<NaiveDateTime> {
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(parsed);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed);
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(
            parsed
                .and_hms_opt(0, 0, 0)
                .expect("midnight is a valid time of day"),
        );
    }
    None
}

fn localize(naive: NaiveDateTime, tz: Tz, raw: &str) -> Result<i64, TimestampError> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(localized) => Ok(localized.timestamp_millis()),
        LocalResult::Ambiguous(_, _) => Err(TimestampError::AmbiguousLocal {
            value: raw.to_string(),
            tz: tz.name().to_string(),
        }),
        LocalResult::None => Err(TimestampError::NonexistentLocal {
            value: raw.to_string(),
            tz: tz.name().to_string(),
        }),
    }
}

/// Converts epoch milliseconds UTC back to a chrono instant.
pub fn utc_from_ts_ms(ts_ms_utc: i64) -> Result<DateTime<Utc>, TimestampError> {
    Utc.timestamp_millis_opt(ts_ms_utc)
        .single()
        .ok_or(TimestampError::InvalidTimestamp(ts_ms_utc))
}

/// Renders epoch milliseconds UTC as `YYYY-MM-DD HH:MM:SS`.
///
/// Sub-second precision is dropped, never rounded up.
pub fn format_datetime_second(ts_ms_utc: i64) -> Result<String, TimestampError> {
    let instant = utc_from_ts_ms(ts_ms_utc)?;
    Ok(instant.format(DATETIME_SECOND_FORMAT).to_string())
}
