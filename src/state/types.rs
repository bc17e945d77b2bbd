//! Bookmark types
//!
//! These types are serialized to JSON and persisted between runs as a flat
//! `entity -> {replication_key_value, updated_at}` document.

use crate::types::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Value of an entity's replication key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplicationValue {
    Integer(i64),
    Text(String),
}

impl ReplicationValue {
    /// Take a replication value from a record field
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Integer).or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                    .map(|f| Self::Integer(f as i64))
            }),
            Value::String(s) if !s.is_empty() => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// The instant this value denotes, if it is a timestamp
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Text(s) => parse_timestamp(s),
            Self::Integer(_) => None,
        }
    }

    /// Render the value for a query-string filter
    pub fn to_query_value(&self) -> String {
        match self {
            Self::Integer(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

impl std::fmt::Display for ReplicationValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_query_value())
    }
}

impl Ord for ReplicationValue {
    /// Integers compare numerically, timestamps by instant, other text
    /// lexicographically. Integers sort before text and timestamps before
    /// other text so the order stays total.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Integer(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Integer(_)) => Ordering::Greater,
            (Self::Text(a), Self::Text(b)) => match (parse_timestamp(a), parse_timestamp(b)) {
                (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.cmp(b),
            },
        }
    }
}

impl PartialOrd for ReplicationValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Progress marker for one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(rename = "replication_key_value")]
    pub value: ReplicationValue,
    pub updated_at: DateTime<Utc>,
}

impl Bookmark {
    pub fn new(value: ReplicationValue) -> Self {
        Self {
            value,
            updated_at: Utc::now(),
        }
    }

    /// Filter lower bound for the next run
    ///
    /// Timestamps move back by `lookback`; integers are used as stored.
    pub fn lower_bound(&self, lookback: chrono::Duration) -> String {
        match self.value.as_timestamp() {
            Some(ts) => format_timestamp(&(ts - lookback)),
            None => self.value.to_query_value(),
        }
    }
}

/// All bookmarks, keyed by entity name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookmarkState {
    pub entities: BTreeMap<String, Bookmark>,
}

impl BookmarkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: &str) -> Option<&Bookmark> {
        self.entities.get(entity)
    }

    /// Monotonic max: returns whether the stored value moved forward
    pub fn advance(&mut self, entity: &str, candidate: ReplicationValue) -> bool {
        match self.entities.get_mut(entity) {
            Some(current) if candidate <= current.value => false,
            Some(current) => {
                *current = Bookmark::new(candidate);
                true
            }
            None => {
                self.entities
                    .insert(entity.to_string(), Bookmark::new(candidate));
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn text(s: &str) -> ReplicationValue {
        ReplicationValue::Text(s.to_string())
    }

    #[test_case(ReplicationValue::Integer(9), ReplicationValue::Integer(10) ; "integers numerically")]
    #[test_case(text("2024-01-01T10:00:00Z"), text("2024-01-01T10:00:00.5Z") ; "fraction beats none")]
    #[test_case(text("2024-01-01T12:00:00+02:00"), text("2024-01-01T11:00:00Z") ; "offsets by instant")]
    #[test_case(text("2024-01-01 09:00:00"), text("2024-01-01T10:00:00Z") ; "mixed formats")]
    #[test_case(text("abc"), text("abd") ; "plain text lexicographic")]
    #[test_case(ReplicationValue::Integer(i64::MAX), text("0") ; "integers before text")]
    fn test_ordering(lower: ReplicationValue, higher: ReplicationValue) {
        assert!(lower < higher);
        assert!(higher > lower);
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            ReplicationValue::from_json(&json!(42)),
            Some(ReplicationValue::Integer(42))
        );
        assert_eq!(
            ReplicationValue::from_json(&json!(42.0)),
            Some(ReplicationValue::Integer(42))
        );
        assert_eq!(ReplicationValue::from_json(&json!("x")), Some(text("x")));
        assert_eq!(ReplicationValue::from_json(&json!("")), None);
        assert_eq!(ReplicationValue::from_json(&json!(null)), None);
        assert_eq!(ReplicationValue::from_json(&json!(1.5)), None);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut state = BookmarkState::new();
        let values = [5, 3, 9, 1, 9, 7];
        for v in values {
            state.advance("item", ReplicationValue::Integer(v));
        }
        assert_eq!(
            state.get("item").unwrap().value,
            ReplicationValue::Integer(9)
        );
    }

    #[test]
    fn test_advance_reports_movement() {
        let mut state = BookmarkState::new();
        assert!(state.advance("item", text("2024-01-02T00:00:00Z")));
        assert!(!state.advance("item", text("2024-01-01T00:00:00Z")));
        assert!(!state.advance("item", text("2024-01-02T00:00:00Z")));
        assert!(state.advance("item", text("2024-01-03T00:00:00Z")));
    }

    #[test]
    fn test_lower_bound() {
        let bookmark = Bookmark::new(text("2024-03-01T12:00:00Z"));
        assert_eq!(
            bookmark.lower_bound(chrono::Duration::minutes(5)),
            "2024-03-01T11:55:00.000000Z"
        );

        let bookmark = Bookmark::new(ReplicationValue::Integer(1200));
        assert_eq!(bookmark.lower_bound(chrono::Duration::minutes(5)), "1200");

        let bookmark = Bookmark::new(text("v-17"));
        assert_eq!(bookmark.lower_bound(chrono::Duration::minutes(5)), "v-17");
    }

    #[test]
    fn test_state_layout() {
        let mut state = BookmarkState::new();
        state.advance("item", text("2024-01-01T00:00:00Z"));
        state.advance("order", ReplicationValue::Integer(7));

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["item"]["replication_key_value"], "2024-01-01T00:00:00Z");
        assert_eq!(json["order"]["replication_key_value"], 7);
        assert!(json["order"]["updated_at"].is_string());

        let restored: BookmarkState = serde_json::from_value(json).unwrap();
        assert_eq!(restored, state);
    }
}
