//! Time utilities.
//!
//! Message timestamps are ISO-8601 UTC strings with millisecond precision
//! and a `Z` suffix. The fixed width keeps lexicographic order equal to
//! chronological order, which the store relies on for `ORDER BY timestamp`
//! and for the `expiresOn < now` comparison.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

const MAX_OFFSET_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Returns the current time as an ISO-8601 string.
pub fn now_iso() -> String {
    format_iso(Utc::now())
}

/// Formats a UTC instant the way the store expects.
pub fn format_iso(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an ISO-8601 timestamp, normalising any offset to UTC.
pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Returns `from + secs` as an ISO-8601 string.
///
/// An unparseable `from` falls back to the current time. Offsets are
/// capped at a century.
pub fn iso_after_secs(from: &str, secs: u64) -> String {
    let base = parse_iso(from).unwrap_or_else(Utc::now);
    let secs = secs.min(MAX_OFFSET_SECS) as i64;
    format_iso(base + Duration::seconds(secs))
}

/// Normalises a peer-supplied timestamp, falling back to now.
pub fn normalize_iso(value: Option<&str>) -> String {
    value
        .and_then(parse_iso)
        .map(format_iso)
        .unwrap_or_else(now_iso)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_timestamp_millis_is_reasonable() {
        let ts = now_timestamp_millis();
        // Should be after 2024-01-01 in millis
        assert!(ts > 1704067200_000, "Timestamp {} is too old", ts);
    }

    #[test]
    fn test_iso_format_is_fixed_width() {
        let ts = now_iso();
        assert_eq!(ts.len(), "2024-01-01T00:00:00.000Z".len());
        assert!(ts.ends_with('Z'));
    }

    #[test]
    fn test_iso_after_secs() {
        let later = iso_after_secs("2024-01-01T00:00:00.000Z", 90);
        assert_eq!(later, "2024-01-01T00:01:30.000Z");
    }

    #[test]
    fn test_normalize_converts_offsets() {
        let ts = normalize_iso(Some("2024-01-01T02:00:00+02:00"));
        assert_eq!(ts, "2024-01-01T00:00:00.000Z");
        assert!(normalize_iso(Some("yesterday")).ends_with('Z'));
    }

    #[test]
    fn test_lexicographic_order_matches_time_order() {
        let a = iso_after_secs("2024-01-01T00:00:09.000Z", 0);
        let b = iso_after_secs("2024-01-01T00:00:09.000Z", 1);
        assert!(a < b);
    }
}
