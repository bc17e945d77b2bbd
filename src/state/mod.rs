//! Bookmark state module
//!
//! Tracks, per entity, the highest replication-key value extracted so far.
//! Bookmarks are persisted between runs to enable incremental extraction.
//!
//! # Overview
//!
//! The state module provides:
//! - `ReplicationValue` - Integer or text key values with natural ordering
//! - `BookmarkState` - The persisted `entity -> bookmark` document
//! - `BookmarkStore` - Shared, file-backed store with atomic flushes

mod manager;
mod types;

pub use manager::BookmarkStore;
pub use types::{Bookmark, BookmarkState, ReplicationValue};
