//! Timestamp conversion at the request boundary.
//!
//! Everything inside the engine is UTC milliseconds. Strings coming in are
//! ISO-8601; strings without an offset are read in the fleet's configured
//! local offset.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, SecondsFormat, TimeZone, Utc};

use crate::engine::EngineError;
use crate::model::Ms;

const LOCAL_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

pub fn utc() -> FixedOffset {
    Utc.fix()
}

/// Parse an ISO-8601 timestamp into UTC milliseconds.
pub fn parse_timestamp(s: &str, local: FixedOffset) -> Result<Ms, EngineError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for fmt in LOCAL_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return local
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.timestamp_millis())
                .ok_or_else(|| EngineError::InvalidTimestamp(s.to_string()));
        }
    }
    Err(EngineError::InvalidTimestamp(s.to_string()))
}

/// Render as RFC 3339 with millisecond precision in the given offset.
pub fn format_timestamp(ms: Ms, offset: FixedOffset) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(dt) => dt
            .with_timezone(&offset)
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ms.to_string(),
    }
}

/// Parse `+07:00`, `-0330`, `Z` or `UTC`.
pub fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Some(utc());
    }
    s.parse::<FixedOffset>().ok()
}
