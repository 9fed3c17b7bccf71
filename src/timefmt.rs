//! Timestamp encoding shared by the state store and the engine.
//!
//! Timestamps are persisted as RFC 3339 UTC strings with second precision so
//! that SQL range filters can compare them as plain text.

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Encode a timestamp for storage (`2026-03-01T07:00:00Z`).
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Decode a stored timestamp.
///
/// Accepts RFC 3339 as well as the naive ISO-8601 form written by older
/// databases, which is interpreted in local time. Anything else is `None`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Whole seconds from `start` to `now`, floored at zero.
pub fn elapsed_seconds(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(start).num_seconds().max(0)
}

/// Split a second count into `(hours, minutes)`, negative input counts as zero.
pub fn hours_minutes(seconds: i64) -> (i64, i64) {
    let total_minutes = seconds.max(0) / 60;
    (total_minutes / 60, total_minutes % 60)
}

/// Render a timestamp in local time as `YYYY-MM-DD HH:MM`.
pub fn local_minute(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}
