//! Pagination strategy implementations
//!
//! Offset pagination counts records; cursor pagination follows next links.
//! The choice is made once per entity by [`select_strategy`].

use super::types::{records_in, PageToken, PaginationSettings, PaginationStrategy};
use crate::error::{Error, Result};
use crate::http::{ApiRequest, ApiResponse, Transport};
use crate::types::{lookup_path, lookup_string, lookup_u64, PaginationMode};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

fn base_request(endpoint: &str, filters: &BTreeMap<String, String>) -> ApiRequest {
    ApiRequest {
        target: endpoint.to_string(),
        query: filters.clone(),
        headers: BTreeMap::new(),
    }
}

// ============================================================================
// Offset Pagination
// ============================================================================

/// Offset/limit pagination with a reported total or `has_more` flag
///
/// Rows inserted or deleted upstream while an extraction is running can
/// shift offsets, so a long run may skip or repeat records. That is an
/// accepted limitation of this strategy; large entities should use cursors.
#[derive(Debug, Clone)]
pub struct OffsetStrategy {
    settings: PaginationSettings,
}

impl OffsetStrategy {
    pub fn new(settings: PaginationSettings) -> Self {
        Self { settings }
    }

    fn current_offset(&self, request: &ApiRequest) -> u64 {
        request
            .query_value(&self.settings.offset_param)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn current_page_size(&self, request: &ApiRequest) -> u32 {
        request
            .query_value(&self.settings.limit_param)
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.settings.page_size)
    }
}

impl PaginationStrategy for OffsetStrategy {
    fn name(&self) -> &'static str {
        "offset"
    }

    fn first_request(
        &self,
        endpoint: &str,
        filters: &BTreeMap<String, String>,
        page_size: u32,
    ) -> ApiRequest {
        base_request(endpoint, filters)
            .query(&self.settings.offset_param, "0")
            .query(&self.settings.limit_param, page_size.to_string())
    }

    fn next_page_token(&self, request: &ApiRequest, response: &ApiResponse) -> Option<PageToken> {
        let received = records_in(&response.body, self.settings.records_path.as_deref())
            .map_or(0, <[Value]>::len) as u64;
        if received == 0 {
            return None;
        }

        let page_size = self.current_page_size(request);
        let next_offset = self.current_offset(request) + received;

        let more = match lookup_path(&response.body, &self.settings.has_more_path) {
            Some(Value::Bool(has_more)) => *has_more,
            _ => match lookup_u64(&response.body, &self.settings.total_path) {
                Some(total) => next_offset < total,
                None => received >= u64::from(page_size),
            },
        };

        more.then_some(PageToken::Offset {
            offset: next_offset,
            page_size,
        })
    }

    fn apply_token(&self, first: &ApiRequest, token: &PageToken) -> Result<ApiRequest> {
        match token {
            PageToken::Offset { offset, page_size } => Ok(first
                .clone()
                .query(&self.settings.offset_param, offset.to_string())
                .query(&self.settings.limit_param, page_size.to_string())),
            PageToken::Cursor { .. } => Err(Error::Other(
                "offset pagination cannot follow a cursor token".to_string(),
            )),
        }
    }
}

// ============================================================================
// Cursor Pagination
// ============================================================================

/// Follows `next` links from the body or from an RFC 5988 `Link` header
///
/// Stable under concurrent upstream writes and flat-cost regardless of how
/// deep the extraction is.
#[derive(Debug, Clone)]
pub struct CursorStrategy {
    settings: PaginationSettings,
    base_url: Url,
}

impl CursorStrategy {
    pub fn new(settings: PaginationSettings, base_url: Url) -> Self {
        Self { settings, base_url }
    }

    fn next_link(&self, response: &ApiResponse) -> Option<String> {
        lookup_string(&response.body, &self.settings.next_path)
            .filter(|link| !link.trim().is_empty())
            .or_else(|| {
                response
                    .header("link")
                    .and_then(|header| parse_link_header(header, "next"))
            })
    }
}

impl PaginationStrategy for CursorStrategy {
    fn name(&self) -> &'static str {
        "cursor"
    }

    fn first_request(
        &self,
        endpoint: &str,
        filters: &BTreeMap<String, String>,
        page_size: u32,
    ) -> ApiRequest {
        base_request(endpoint, filters).query(&self.settings.limit_param, page_size.to_string())
    }

    fn next_page_token(&self, request: &ApiRequest, response: &ApiResponse) -> Option<PageToken> {
        let received = records_in(&response.body, self.settings.records_path.as_deref())
            .map_or(0, <[Value]>::len);
        if received == 0 {
            return None;
        }

        let page_size = request
            .query_value(&self.settings.limit_param)
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.settings.page_size);

        self.next_link(response)
            .map(|link| PageToken::Cursor { link, page_size })
    }

    fn apply_token(&self, first: &ApiRequest, token: &PageToken) -> Result<ApiRequest> {
        let PageToken::Cursor { link, page_size } = token else {
            return Err(Error::Other(
                "cursor pagination cannot follow an offset token".to_string(),
            ));
        };

        let mut next = ApiRequest::from_link(link, &self.base_url)?;
        // Some upstreams drop filters from their next links
        for (key, value) in &first.query {
            next.query.entry(key.clone()).or_insert_with(|| value.clone());
        }
        next.set_query(&self.settings.limit_param, page_size.to_string());
        next.headers = first.headers.clone();
        Ok(next)
    }
}

/// Parse a Link header and extract the URL for the given rel
pub(super) fn parse_link_header(header: &str, target_rel: &str) -> Option<String> {
    // Link header format: <url>; rel="next", <url>; rel="prev"
    for part in header.split(',') {
        let mut url = None;
        let mut rel = None;

        for segment in part.trim().split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(stripped) = segment.strip_prefix("rel=") {
                rel = Some(stripped.trim_matches('"').trim_matches('\''));
            }
        }

        if let (Some(u), Some(r)) = (url, rel) {
            if r.split_whitespace().any(|r| r == target_rel) {
                return Some(u.to_string());
            }
        }
    }

    None
}

// ============================================================================
// Selection
// ============================================================================

/// Ask the upstream for one record and read the reported total
pub async fn probe_record_count(
    transport: &dyn Transport,
    settings: &PaginationSettings,
    endpoint: &str,
    filters: &BTreeMap<String, String>,
) -> Result<Option<u64>> {
    let request = base_request(endpoint, filters).query(&settings.limit_param, "1");
    let response = transport.execute(&request).await?;
    Ok(lookup_u64(&response.body, &settings.total_path))
}

/// Choose the strategy for one entity; the choice holds for the whole run
pub async fn select_strategy(
    transport: &dyn Transport,
    settings: &PaginationSettings,
    mode: PaginationMode,
    base_url: &Url,
    endpoint: &str,
    filters: &BTreeMap<String, String>,
) -> Result<Box<dyn PaginationStrategy>> {
    let use_cursor = match (mode, settings.cursor_threshold) {
        (PaginationMode::Offset, _) | (PaginationMode::Auto, None) => false,
        (PaginationMode::Cursor, _) => true,
        (PaginationMode::Auto, Some(threshold)) => {
            let count = probe_record_count(transport, settings, endpoint, filters).await?;
            debug!(endpoint, ?count, threshold, "probed record count");
            count.is_some_and(|count| count > threshold)
        }
    };

    Ok(if use_cursor {
        Box::new(CursorStrategy::new(settings.clone(), base_url.clone()))
    } else {
        Box::new(OffsetStrategy::new(settings.clone()))
    })
}
