//! Pagination module
//!
//! Supports: Offset (with total or `has_more`), Cursor (next link in the body
//! or a `Link` header)
//!
//! # Overview
//!
//! A [`PaginationStrategy`] builds the first request of an extraction, turns
//! each response into an optional [`PageToken`], and applies that token to
//! build the next request. The extractor drives the loop.

mod strategies;
mod types;

pub use strategies::{probe_record_count, select_strategy, CursorStrategy, OffsetStrategy};
pub use types::{records_in, PageToken, PaginationSettings, PaginationStrategy};

#[cfg(test)]
mod tests;
