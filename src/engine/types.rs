//! Engine types
//!
//! Messages flowing to the downstream consumer, per-entity plans and the
//! statistics reported when a run finishes.

use crate::discovery::{CatalogEntry, EntityDescriptor};
use crate::schema::RecordSchema;
use crate::state::{BookmarkState, ReplicationValue};
use crate::types::{ErrorPolicy, JsonObject, PaginationMode, SyncMode};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Phases
// ============================================================================

/// Where one entity's extraction stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionPhase {
    #[default]
    NotStarted,
    DiscoveringSchema,
    Paginating,
    Completed,
    Failed,
}

impl ExtractionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Allowed moves: forward one step, or to `Failed` from any live phase
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (from, Self::Failed) => !from.is_terminal(),
            (Self::NotStarted, Self::DiscoveringSchema)
            | (Self::DiscoveringSchema, Self::Paginating)
            | (Self::Paginating, Self::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExtractionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::DiscoveringSchema => "discovering_schema",
            Self::Paginating => "paginating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Output of a run, in schema-then-records order per entity
#[derive(Debug, Clone)]
pub enum Message {
    /// Sent once per entity before any of its records
    Schema {
        entity: String,
        schema: Arc<RecordSchema>,
        key_properties: Vec<String>,
        replication_key: Option<String>,
    },
    /// One page of transformed records
    ///
    /// `bookmark` is the page's highest replication value; the store takes
    /// it when the consumer receives the page.
    Records {
        entity: String,
        page: u32,
        records: Vec<JsonObject>,
        bookmark: Option<ReplicationValue>,
    },
    /// Bookmark snapshot after a checkpoint or entity completion
    Bookmark {
        entity: String,
        state: BookmarkState,
    },
    /// An entity stopped early; the run continues
    EntityFailed {
        entity: String,
        kind: &'static str,
        message: String,
    },
}

/// What workers put on the channel to the consumer
#[derive(Debug)]
pub(super) enum Outbound {
    Message(Message),
    /// Flush bookmarks once everything queued before it has been delivered
    Checkpoint { entity: String },
}

impl Message {
    pub fn entity(&self) -> &str {
        match self {
            Self::Schema { entity, .. }
            | Self::Records { entity, .. }
            | Self::Bookmark { entity, .. }
            | Self::EntityFailed { entity, .. } => entity,
        }
    }

    pub fn is_schema(&self) -> bool {
        matches!(self, Self::Schema { .. })
    }

    pub fn is_records(&self) -> bool {
        matches!(self, Self::Records { .. })
    }

    pub fn is_bookmark(&self) -> bool {
        matches!(self, Self::Bookmark { .. })
    }

    /// Records carried by this message
    pub fn record_count(&self) -> usize {
        match self {
            Self::Records { records, .. } => records.len(),
            _ => 0,
        }
    }
}

// ============================================================================
// Plans and Settings
// ============================================================================

/// Everything needed to extract one entity
#[derive(Debug, Clone)]
pub struct EntityPlan {
    pub descriptor: EntityDescriptor,
    pub schema: Arc<RecordSchema>,
    pub sync_mode: SyncMode,
    pub pagination_mode: PaginationMode,
    pub error_policy: ErrorPolicy,
    /// Passed to the upstream as-is
    pub filters: BTreeMap<String, String>,
}

impl EntityPlan {
    /// Plan with defaults: incremental when the entity supports it
    pub fn from_entry(entry: &CatalogEntry) -> Self {
        let sync_mode = if entry.descriptor.supports_incremental {
            SyncMode::Incremental
        } else {
            SyncMode::FullRefresh
        };
        Self {
            descriptor: entry.descriptor.clone(),
            schema: Arc::new(entry.schema.clone()),
            sync_mode,
            pagination_mode: PaginationMode::default(),
            error_policy: ErrorPolicy::default(),
            filters: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Replication key, when this plan extracts incrementally
    pub fn incremental_key(&self) -> Option<&str> {
        match self.sync_mode {
            SyncMode::Incremental => self.descriptor.replication_key.as_deref(),
            SyncMode::FullRefresh => None,
        }
    }

    #[must_use]
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    #[must_use]
    pub fn with_pagination_mode(mut self, mode: PaginationMode) -> Self {
        self.pagination_mode = mode;
        self
    }

    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }
}

/// Run-wide engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Entities extracted at once
    pub concurrency: usize,
    /// Pages buffered between the engine and a slow consumer
    pub buffer_pages: usize,
    /// Records between bookmark flushes; 0 flushes only at entity end
    pub checkpoint_interval: usize,
    /// Subtracted from stored timestamp bookmarks
    pub lookback: chrono::Duration,
    /// Lower bound when an entity has no bookmark yet
    pub start_date: Option<String>,
    /// Lower-bound filter parameter; `{key}` is the replication key
    pub replication_filter: String,
    /// Extra attempts per page under `retry_and_continue`
    pub page_retries: u32,
    /// Pause before each extra page attempt
    pub page_retry_delay: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            buffer_pages: 4,
            checkpoint_interval: 1000,
            lookback: chrono::Duration::minutes(5),
            start_date: None,
            replication_filter: "{key}__gte".to_string(),
            page_retries: 2,
            page_retry_delay: std::time::Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_buffer_pages(mut self, pages: usize) -> Self {
        self.buffer_pages = pages;
        self
    }

    #[must_use]
    pub fn with_checkpoint_interval(mut self, records: usize) -> Self {
        self.checkpoint_interval = records;
        self
    }

    #[must_use]
    pub fn with_lookback(mut self, lookback: chrono::Duration) -> Self {
        self.lookback = lookback;
        self
    }

    #[must_use]
    pub fn with_start_date(mut self, start_date: impl Into<String>) -> Self {
        self.start_date = Some(start_date.into());
        self
    }

    #[must_use]
    pub fn with_page_retry_delay(mut self, delay: std::time::Duration) -> Self {
        self.page_retry_delay = delay;
        self
    }

    /// Filter parameter carrying the lower bound for `key`
    pub fn filter_param(&self, key: &str) -> String {
        self.replication_filter.replace("{key}", key)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Outcome of one entity's extraction
#[derive(Debug, Clone, Default)]
pub struct EntityStats {
    pub entity: String,
    pub phase: ExtractionPhase,
    pub strategy: Option<&'static str>,
    pub records: usize,
    pub pages: usize,
    /// Records dropped for failing validation
    pub dropped: usize,
    /// Failed page attempts, including ones a later attempt recovered
    pub errors: usize,
    pub duration_ms: u64,
}

impl EntityStats {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Self::default()
        }
    }

    pub fn add_page(&mut self, records: usize) {
        self.pages += 1;
        self.records += records;
    }

    pub fn add_dropped(&mut self) {
        self.dropped += 1;
    }

    pub fn add_error(&mut self) {
        self.errors += 1;
    }
}

/// Everything a finished run reports
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub entities: Vec<EntityStats>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn total_records(&self) -> usize {
        self.entities.iter().map(|e| e.records).sum()
    }

    pub fn total_pages(&self) -> usize {
        self.entities.iter().map(|e| e.pages).sum()
    }

    pub fn get(&self, entity: &str) -> Option<&EntityStats> {
        self.entities.iter().find(|e| e.entity == entity)
    }

    pub fn failed(&self) -> impl Iterator<Item = &EntityStats> {
        self.entities
            .iter()
            .filter(|e| e.phase == ExtractionPhase::Failed)
    }
}
