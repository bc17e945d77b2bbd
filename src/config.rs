//! Extractor configuration
//!
//! `TapConfig` is read from a YAML or JSON file (or inline JSON) and turned
//! into the settings each component takes. Every field has a default except
//! `base_url`.
//!
//! ```yaml
//! base_url: https://wms.example.com/api/
//! auth:
//!   type: basic
//!   username: extractor
//!   password: secret
//! entities: [item, order]
//! entity_overrides:
//!   order:
//!     filters: {facility_id__code: DC01}
//!     error_policy: fail_fast
//! ```

use crate::auth::AuthConfig;
use crate::discovery::{Catalog, DiscoverySettings, EntityHints};
use crate::engine::{EngineConfig, EntityPlan};
use crate::error::{Error, Result};
use crate::http::{
    CircuitBreakerConfig, HttpClient, HttpClientConfig, RateLimiterConfig, RetryPolicy,
};
use crate::pagination::PaginationSettings;
use crate::types::{format_timestamp, parse_timestamp, ErrorPolicy, PaginationMode, SyncMode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Bounds for `discovery.sample_size`
pub const SAMPLE_SIZE_RANGE: std::ops::RangeInclusive<u32> = 5..=50;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Complete extractor configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    /// Root of the upstream REST API
    pub base_url: String,

    pub auth: AuthConfig,

    pub http: HttpSettings,

    pub retry: RetryPolicy,

    pub circuit_breaker: CircuitBreakerConfig,

    pub pagination: PaginationSettings,

    pub discovery: DiscoverySettings,

    /// Entities to extract; empty extracts everything discovered
    pub entities: Vec<String>,

    pub entity_overrides: BTreeMap<String, EntityOverride>,

    /// Subtracted from timestamp bookmarks before filtering
    pub lookback_minutes: u32,

    /// Lower bound for entities without a bookmark
    pub start_date: Option<String>,

    /// Entities extracted at once
    pub concurrency: usize,

    /// Records between bookmark checkpoints
    pub checkpoint_interval: usize,

    /// Pages buffered for a slow consumer
    pub buffer_pages: usize,

    /// Default for entities without an override
    pub error_policy: ErrorPolicy,

    /// Lower-bound filter parameter; `{key}` is the replication key
    pub replication_filter: String,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth: AuthConfig::None,
            http: HttpSettings::default(),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            pagination: PaginationSettings::default(),
            discovery: DiscoverySettings::default(),
            entities: Vec::new(),
            entity_overrides: BTreeMap::new(),
            lookback_minutes: 5,
            start_date: None,
            concurrency: 3,
            checkpoint_interval: 1000,
            buffer_pages: 4,
            error_policy: ErrorPolicy::default(),
            replication_filter: "{key}__gte".to_string(),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Transport settings outside retry and circuit breaking
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Per-attempt request timeout in seconds
    pub timeout_secs: u64,

    pub user_agent: Option<String>,

    /// Client-side pacing; unset sends as fast as responses allow
    pub rate_limit: Option<RateLimiterConfig>,

    /// Sent with every request
    pub headers: BTreeMap<String, String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: None,
            rate_limit: None,
            headers: BTreeMap::new(),
        }
    }
}

/// Per-entity settings layered over the defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EntityOverride {
    /// Passed to the upstream as-is, e.g. `facility_id__code: DC01`
    pub filters: BTreeMap<String, String>,
    pub pagination_mode: Option<PaginationMode>,
    pub primary_key: Option<Vec<String>>,
    pub replication_key: Option<String>,
    pub sync_mode: Option<SyncMode>,
    pub error_policy: Option<ErrorPolicy>,
}

// ============================================================================
// Loading
// ============================================================================

impl TapConfig {
    /// Load from a file path or an inline JSON document
    ///
    /// Files ending in `.json` are read as JSON, anything else as YAML.
    pub fn load(source: &str) -> Result<Self> {
        if source.trim_start().starts_with('{') {
            return Self::from_json(source);
        }

        let path = Path::new(source);
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("Failed to parse config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check settings that must hold before any request is made
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;

        let pagination = &self.pagination;
        if pagination.min_page_size == 0 {
            return Err(Error::invalid_value(
                "pagination.min_page_size",
                "must be at least 1",
            ));
        }
        if pagination.min_page_size > pagination.max_page_size {
            return Err(Error::invalid_value(
                "pagination.min_page_size",
                format!(
                    "{} exceeds max_page_size {}",
                    pagination.min_page_size, pagination.max_page_size
                ),
            ));
        }
        if !(pagination.min_page_size..=pagination.max_page_size).contains(&pagination.page_size) {
            return Err(Error::invalid_value(
                "pagination.page_size",
                format!(
                    "{} is outside [{}, {}]",
                    pagination.page_size, pagination.min_page_size, pagination.max_page_size
                ),
            ));
        }

        for (field, value) in [
            ("concurrency", self.concurrency),
            ("buffer_pages", self.buffer_pages),
            ("discovery.concurrency", self.discovery.concurrency),
            ("discovery.max_depth", self.discovery.max_depth),
        ] {
            if value == 0 {
                return Err(Error::invalid_value(field, "must be at least 1"));
            }
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(Error::invalid_value(
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err(Error::invalid_value(
                "circuit_breaker.success_threshold",
                "must be at least 1",
            ));
        }

        if !SAMPLE_SIZE_RANGE.contains(&self.discovery.sample_size) {
            return Err(Error::invalid_value(
                "discovery.sample_size",
                format!(
                    "{} is outside [{}, {}]",
                    self.discovery.sample_size,
                    SAMPLE_SIZE_RANGE.start(),
                    SAMPLE_SIZE_RANGE.end()
                ),
            ));
        }

        if !self.replication_filter.contains("{key}") {
            return Err(Error::invalid_value(
                "replication_filter",
                "must contain the {key} placeholder",
            ));
        }

        self.start_date()?;

        for (name, entity) in &self.entity_overrides {
            let blank_key = entity
                .replication_key
                .as_deref()
                .is_some_and(|key| key.trim().is_empty());
            if entity.sync_mode == Some(SyncMode::Incremental) && blank_key {
                return Err(Error::invalid_value(
                    format!("entity_overrides.{name}.replication_key"),
                    "incremental sync needs a non-empty replication key",
                ));
            }
            if entity
                .primary_key
                .as_ref()
                .is_some_and(|key| key.iter().any(|k| k.trim().is_empty()))
            {
                return Err(Error::invalid_value(
                    format!("entity_overrides.{name}.primary_key"),
                    "key fields cannot be empty",
                ));
            }
        }

        Ok(())
    }

    /// Check the selection and overrides against what discovery found
    pub fn validate_against_catalog(&self, catalog: &Catalog) -> Result<()> {
        for name in &self.entities {
            if catalog.get(name).is_none() {
                return Err(Error::EntityNotFound {
                    entity: name.clone(),
                });
            }
        }

        for (name, entity) in &self.entity_overrides {
            let Some(entry) = catalog.get(name) else {
                continue;
            };
            let has_key = entity.replication_key.is_some()
                || entry.descriptor.replication_key.is_some();
            if entity.sync_mode == Some(SyncMode::Incremental) && !has_key {
                return Err(Error::invalid_value(
                    format!("entity_overrides.{name}.sync_mode"),
                    format!("'{name}' has no replication key, so it cannot sync incrementally"),
                ));
            }
        }

        Ok(())
    }

    // ========================================================================
    // Component Settings
    // ========================================================================

    pub fn base_url(&self) -> Result<Url> {
        if self.base_url.trim().is_empty() {
            return Err(Error::missing_field("base_url"));
        }
        let url = Url::parse(&self.base_url)
            .map_err(|e| Error::invalid_value("base_url", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::invalid_value(
                "base_url",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        Ok(url)
    }

    /// `start_date` in canonical form
    pub fn start_date(&self) -> Result<Option<String>> {
        self.start_date
            .as_deref()
            .map(|raw| {
                parse_timestamp(raw)
                    .map(|ts| format_timestamp(&ts))
                    .ok_or_else(|| {
                        Error::invalid_value("start_date", format!("'{raw}' is not a timestamp"))
                    })
            })
            .transpose()
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        let mut builder = HttpClientConfig::builder()
            .base_url(self.base_url.clone())
            .timeout(Duration::from_secs(self.http.timeout_secs))
            .retry(self.retry)
            .circuit_breaker(self.circuit_breaker);
        if let Some(rate_limit) = self.http.rate_limit {
            builder = builder.rate_limit(rate_limit);
        }
        if let Some(agent) = &self.http.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        for (key, value) in &self.http.headers {
            builder = builder.header(key.clone(), value.clone());
        }
        builder.build()
    }

    /// Authenticated client for the upstream
    pub fn build_transport(&self) -> Result<HttpClient> {
        HttpClient::with_auth(self.http_client_config(), self.auth.clone())
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        Ok(EngineConfig {
            concurrency: self.concurrency,
            buffer_pages: self.buffer_pages,
            checkpoint_interval: self.checkpoint_interval,
            lookback: chrono::Duration::minutes(i64::from(self.lookback_minutes)),
            start_date: self.start_date()?,
            replication_filter: self.replication_filter.clone(),
            ..EngineConfig::default()
        })
    }

    /// Key overrides handed to discovery
    pub fn hints(&self) -> BTreeMap<String, EntityHints> {
        self.entity_overrides
            .iter()
            .filter(|(_, o)| o.primary_key.is_some() || o.replication_key.is_some())
            .map(|(name, o)| {
                (
                    name.clone(),
                    EntityHints {
                        primary_key: o.primary_key.clone(),
                        replication_key: o.replication_key.clone(),
                    },
                )
            })
            .collect()
    }

    /// Extraction plans for the selected entities, in selection order
    pub fn plans(&self, catalog: &Catalog) -> Result<Vec<EntityPlan>> {
        self.validate_against_catalog(catalog)?;

        let entries: Vec<_> = if self.entities.is_empty() {
            catalog.entries.iter().collect()
        } else {
            self.entities
                .iter()
                .filter_map(|name| catalog.get(name))
                .collect()
        };

        let plans = entries
            .into_iter()
            .map(|entry| {
                let mut plan = EntityPlan::from_entry(entry)
                    .with_pagination_mode(self.pagination.mode)
                    .with_error_policy(self.error_policy);

                if let Some(o) = self.entity_overrides.get(entry.name()) {
                    if let Some(key) = &o.primary_key {
                        plan.descriptor = plan.descriptor.with_primary_key(key.clone());
                    }
                    if let Some(key) = &o.replication_key {
                        plan.descriptor = plan.descriptor.with_replication_key(key.clone());
                    }
                    if let Some(mode) = o.sync_mode {
                        plan = plan.with_sync_mode(mode);
                    } else if plan.descriptor.supports_incremental {
                        plan = plan.with_sync_mode(SyncMode::Incremental);
                    }
                    if let Some(mode) = o.pagination_mode {
                        plan = plan.with_pagination_mode(mode);
                    }
                    if let Some(policy) = o.error_policy {
                        plan = plan.with_error_policy(policy);
                    }
                    for (key, value) in &o.filters {
                        plan = plan.with_filter(key.clone(), value.clone());
                    }
                }
                plan
            })
            .collect();
        Ok(plans)
    }
}
