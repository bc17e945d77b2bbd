// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]

//! # wms-extract
//!
//! Incremental extraction from paginated warehouse-management REST APIs.
//! Entities are discovered at runtime, their schemas generated from
//! describe metadata and sampled records, and their records streamed with
//! per-entity bookmarks so the next run only fetches what changed.
//!
//! ## Features
//!
//! - **Runtime Discovery**: Entity list, describe endpoints, sample fallback
//! - **Schema Generation**: Declared types, inference, hybrid merge, flattening
//! - **Resilient Transport**: Retry with backoff, `Retry-After`, circuit breaker
//! - **Adaptive Pagination**: Offset or cursor, page size tuned to throughput
//! - **Incremental Sync**: Monotonic bookmarks with a lookback window
//! - **Bounded Concurrency**: Entities in parallel, backpressure to the consumer
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use std::sync::Arc;
//! use wms_extract::{
//!     cancel::CancelSignal, config::TapConfig, discovery::EntityDiscoverer,
//!     engine::ExtractionEngine, state::BookmarkStore,
//! };
//!
//! let config = TapConfig::load("tap.yaml")?;
//! let transport = Arc::new(config.build_transport()?);
//! let catalog = EntityDiscoverer::new(transport.clone(), config.discovery.clone(), config.pagination.clone())
//!     .discover(&config.entities)
//!     .await?;
//!
//! let engine = ExtractionEngine::new(transport, config.base_url()?, BookmarkStore::from_file("state.json")?)
//!     .with_config(config.engine_config()?)
//!     .with_pagination(config.pagination.clone())
//!     .with_plans(config.plans(&catalog)?);
//!
//! let (mut messages, run) = engine.run(CancelSignal::never());
//! while let Some(message) = messages.next().await {
//!     // Hand schemas, records and bookmarks downstream
//! }
//! let summary = run.await??;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      ExtractionEngine                         │
//! │   per-entity workers → bounded channel → Message stream       │
//! └───────────────────────────────────────────────────────────────┘
//!                                │
//! ┌───────────┬──────────────┬───┴──────────┬───────────┬─────────┐
//! │   Auth    │    HTTP      │  Pagination  │  Schema   │  State  │
//! ├───────────┼──────────────┼──────────────┼───────────┼─────────┤
//! │ Basic     │ Retry        │ Offset       │ Describe  │ Bookmark│
//! │ Bearer    │ Retry-After  │ Cursor       │ Sample    │ Lookback│
//! │ OAuth2 CC │ Breaker      │ Adaptive size│ Flatten   │ Atomic  │
//! └───────────┴──────────────┴──────────────┴───────────┴─────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types for the extractor
pub mod error;

/// Common types and type aliases
pub mod types;

/// Authentication implementations
pub mod auth;

/// HTTP transport with retry, rate limiting and circuit breaking
pub mod http;

/// Pagination strategies
pub mod pagination;

/// Entity discovery and the catalog
pub mod discovery;

/// Schema generation and record transformation
pub mod schema;

/// Bookmark persistence
pub mod state;

/// Run-level cancellation
pub mod cancel;

/// Extraction orchestration
pub mod engine;

/// Extractor configuration
pub mod config;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

pub use config::TapConfig;
pub use engine::{ExtractionEngine, Message, RunSummary};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
