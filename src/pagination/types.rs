//! Pagination types and traits
//!
//! Defines the strategy seam used by the extractor and the settings both
//! strategies read.

use crate::error::Result;
use crate::http::{ApiRequest, ApiResponse};
use crate::types::{lookup_path, PaginationMode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Continuation for the next page
///
/// Lives only for one entity's extraction; `None` in its place means there
/// are no further pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    /// Record offset of the next page plus the size to request
    Offset { offset: u64, page_size: u32 },
    /// A next link taken from the response, plus the size to request
    Cursor { link: String, page_size: u32 },
}

impl PageToken {
    pub fn page_size(&self) -> u32 {
        match self {
            Self::Offset { page_size, .. } | Self::Cursor { page_size, .. } => *page_size,
        }
    }

    /// Request a different page size for the next page
    ///
    /// Offsets count records, so resizing never skips or repeats rows.
    pub fn set_page_size(&mut self, size: u32) {
        match self {
            Self::Offset { page_size, .. } | Self::Cursor { page_size, .. } => *page_size = size,
        }
    }
}

/// Pagination settings shared by every entity
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PaginationSettings {
    pub mode: PaginationMode,
    /// Initial page size
    pub page_size: u32,
    pub min_page_size: u32,
    pub max_page_size: u32,
    /// Entities with more records than this use cursor pagination in auto mode
    pub cursor_threshold: Option<u64>,
    pub offset_param: String,
    pub limit_param: String,
    /// Query parameter asking the upstream to sort by the replication key
    pub ordering_param: Option<String>,
    /// Path of the records array; unset means the body itself, `results` or `data`
    pub records_path: Option<String>,
    pub total_path: String,
    pub has_more_path: String,
    pub next_path: String,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            mode: PaginationMode::Auto,
            page_size: 100,
            min_page_size: 10,
            max_page_size: 1000,
            cursor_threshold: None,
            offset_param: "offset".to_string(),
            limit_param: "limit".to_string(),
            ordering_param: None,
            records_path: None,
            total_path: "count".to_string(),
            has_more_path: "has_more".to_string(),
            next_path: "next".to_string(),
        }
    }
}

/// How pages are requested and when they stop
///
/// `next_page_token` is a pure function of the request that produced a
/// response and the response itself; the extractor owns the loop.
pub trait PaginationStrategy: Send + Sync + std::fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn first_request(
        &self,
        endpoint: &str,
        filters: &BTreeMap<String, String>,
        page_size: u32,
    ) -> ApiRequest;

    fn next_page_token(&self, request: &ApiRequest, response: &ApiResponse) -> Option<PageToken>;

    /// Build the next request from the first request of this extraction
    fn apply_token(&self, first: &ApiRequest, token: &PageToken) -> Result<ApiRequest>;
}

/// Locate the records array of a page body
///
/// A `null` body is an empty page. Returns `None` when the body has no
/// recognisable records array.
pub fn records_in<'a>(body: &'a Value, records_path: Option<&str>) -> Option<&'a [Value]> {
    if body.is_null() {
        return Some(&[][..]);
    }

    if let Some(path) = records_path {
        return match lookup_path(body, path)? {
            Value::Array(items) => Some(items.as_slice()),
            Value::Null => Some(&[][..]),
            _ => None,
        };
    }

    match body {
        Value::Array(items) => Some(items.as_slice()),
        Value::Object(map) => ["results", "data"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .map(Vec::as_slice),
        _ => None,
    }
}
