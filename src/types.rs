//! Common types used throughout wms-extract
//!
//! This module contains shared type definitions, type aliases,
//! and small JSON helpers used across multiple modules.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

/// Generic key-value map with string keys and values
pub type StringMap = HashMap<String, String>;

// ============================================================================
// Sync Mode
// ============================================================================

/// Synchronization mode for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Full extraction every run
    FullRefresh,
    /// Only records changed since the stored bookmark
    #[default]
    Incremental,
}

// ============================================================================
// Error Policy
// ============================================================================

/// What to do when an entity hits an unrecoverable error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort the whole run
    FailFast,
    /// Abort this entity, continue with the others
    #[default]
    SkipAndContinue,
    /// Retry the failing page a few more times, then behave like skip
    RetryAndContinue,
}

// ============================================================================
// Pagination Mode
// ============================================================================

/// Requested pagination mode for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMode {
    /// Pick per entity from a count probe
    #[default]
    Auto,
    /// Offset/limit pagination with a total count
    Offset,
    /// Follow `next` links
    Cursor,
}

// ============================================================================
// JSON helpers
// ============================================================================

/// Look up a value by a dotted path such as `$.meta.total` or `links.next`
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    if path.is_empty() || path == "$" {
        return Some(value);
    }

    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Array(items) => current = items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Look up a scalar by path and render it as a string
pub fn lookup_string(value: &Value, path: &str) -> Option<String> {
    match lookup_path(value, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Look up a non-negative integer by path (numbers or numeric strings)
pub fn lookup_u64(value: &Value, path: &str) -> Option<u64> {
    match lookup_path(value, path)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Parse the timestamp shapes upstreams send into a UTC instant
///
/// Accepts RFC 3339 (with or without fractional seconds), naive ISO
/// `YYYY-MM-DDTHH:MM:SS[.f]`, SQL-style `YYYY-MM-DD HH:MM:SS[.f][+HH:MM]`
/// and bare dates. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Interpret a Unix epoch number, in seconds or milliseconds
///
/// Values beyond the year 5138 in seconds are read as milliseconds.
pub fn timestamp_from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value.abs() >= 1e11 { value } else { value * 1000.0 };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

/// Canonical timestamp text: RFC 3339, UTC, microsecond precision
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sync_mode_serde() {
        let mode: SyncMode = serde_json::from_str("\"full_refresh\"").unwrap();
        assert_eq!(mode, SyncMode::FullRefresh);

        let json = serde_json::to_string(&SyncMode::Incremental).unwrap();
        assert_eq!(json, "\"incremental\"");
    }

    #[test]
    fn test_error_policy_serde() {
        let policy: ErrorPolicy = serde_json::from_str("\"retry_and_continue\"").unwrap();
        assert_eq!(policy, ErrorPolicy::RetryAndContinue);
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::SkipAndContinue);
    }

    #[test]
    fn test_lookup_path() {
        let body = json!({"meta": {"total": 42, "pages": ["a", "b"]}, "next": null});

        assert_eq!(lookup_path(&body, "$.meta.total"), Some(&json!(42)));
        assert_eq!(lookup_path(&body, "meta.pages.1"), Some(&json!("b")));
        assert_eq!(lookup_path(&body, "meta.missing"), None);
        assert_eq!(lookup_path(&body, "$"), Some(&body));
        assert_eq!(lookup_string(&body, "meta.total"), Some("42".to_string()));
        assert_eq!(lookup_string(&body, "next"), None);
    }

    #[test]
    fn test_lookup_u64() {
        let body = json!({"count": "17", "total": 5, "neg": -1});
        assert_eq!(lookup_u64(&body, "count"), Some(17));
        assert_eq!(lookup_u64(&body, "total"), Some(5));
        assert_eq!(lookup_u64(&body, "neg"), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();

        for raw in [
            "2024-03-01T12:30:00Z",
            "2024-03-01T12:30:00.000Z",
            "2024-03-01T14:30:00+02:00",
            "2024-03-01T12:30:00",
            "2024-03-01 12:30:00",
            "2024-03-01 12:30:00.000000",
            "2024-03-01 12:30:00+00:00",
        ] {
            assert_eq!(parse_timestamp(raw), Some(expected), "{raw}");
        }

        assert_eq!(
            parse_timestamp("2024-03-01"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_timestamp_from_epoch() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(timestamp_from_epoch(1_709_296_200.0), Some(expected));
        assert_eq!(timestamp_from_epoch(1_709_296_200_000.0), Some(expected));
        assert_eq!(timestamp_from_epoch(f64::NAN), None);
    }

    #[test]
    fn test_format_timestamp() {
        let dt = parse_timestamp("2024-03-01T12:30:00.5+01:00").unwrap();
        assert_eq!(format_timestamp(&dt), "2024-03-01T11:30:00.500000Z");
    }
}
