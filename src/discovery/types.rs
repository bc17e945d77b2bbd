//! Discovery types

use crate::schema::{FieldMetadata, RecordSchema};
use crate::types::SyncMode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

// ============================================================================
// Settings
// ============================================================================

/// Where entities and their metadata live on the upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Path of the entity list endpoint
    pub entities_path: String,

    /// Endpoint for an entity the list names without a URL; `{entity}` is replaced
    pub endpoint_template: String,

    /// Describe endpoint; `{endpoint}` and `{entity}` are replaced
    pub describe_path: String,

    /// Records fetched for sample inference
    pub sample_size: u32,

    /// Sample even when describe succeeds, to widen the schema
    pub hybrid: bool,

    /// Nesting levels flattened into top-level paths
    pub max_depth: usize,

    /// Joins flattened path segments
    pub separator: String,

    /// Entities described concurrently
    pub concurrency: usize,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            entities_path: "/".to_string(),
            endpoint_template: "/{entity}/".to_string(),
            describe_path: "{endpoint}describe/".to_string(),
            sample_size: 20,
            hybrid: true,
            max_depth: 3,
            separator: "_".to_string(),
            concurrency: 3,
        }
    }
}

impl DiscoverySettings {
    pub fn endpoint_for(&self, entity: &str) -> String {
        self.endpoint_template.replace("{entity}", entity)
    }

    pub fn describe_path_for(&self, entity: &str, endpoint: &str) -> String {
        self.describe_path
            .replace("{endpoint}", endpoint)
            .replace("{entity}", entity)
    }
}

/// Keys the operator pins for one entity, overriding what discovery finds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityHints {
    pub primary_key: Option<Vec<String>>,
    pub replication_key: Option<String>,
}

// ============================================================================
// Entity Descriptors
// ============================================================================

/// One extractable collection, fixed for the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub endpoint: String,
    pub primary_key: Vec<String>,
    /// Absent means full extraction only
    pub replication_key: Option<String>,
    pub supports_incremental: bool,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            primary_key: vec!["id".to_string()],
            replication_key: None,
            supports_incremental: false,
        }
    }

    #[must_use]
    pub fn with_primary_key(mut self, key: Vec<String>) -> Self {
        self.primary_key = key;
        self
    }

    #[must_use]
    pub fn with_replication_key(mut self, key: impl Into<String>) -> Self {
        self.replication_key = Some(key.into());
        self.supports_incremental = true;
        self
    }

    pub fn supported_sync_modes(&self) -> Vec<SyncMode> {
        if self.supports_incremental {
            vec![SyncMode::FullRefresh, SyncMode::Incremental]
        } else {
            vec![SyncMode::FullRefresh]
        }
    }
}

/// What a describe endpoint told us about an entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescribedEntity {
    pub fields: Vec<FieldMetadata>,
    pub primary_key: Option<Vec<String>>,
    pub replication_key: Option<String>,
}

// ============================================================================
// Catalog
// ============================================================================

/// A discovered entity and its schema
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub descriptor: EntityDescriptor,
    pub schema: RecordSchema,
    /// Described metadata, empty when the schema was inferred
    pub fields: Vec<FieldMetadata>,
}

impl CatalogEntry {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn to_json(&self) -> Value {
        let method = if self.descriptor.supports_incremental {
            "INCREMENTAL"
        } else {
            "FULL_TABLE"
        };
        let related: BTreeMap<&str, &str> = self
            .fields
            .iter()
            .filter_map(|f| Some((f.name.as_str(), f.related_entity.as_deref()?)))
            .collect();

        let mut entry = json!({
            "stream": self.descriptor.name,
            "tap_stream_id": self.descriptor.name,
            "endpoint": self.descriptor.endpoint,
            "key_properties": self.descriptor.primary_key,
            "replication_key": self.descriptor.replication_key,
            "replication_method": method,
            "supported_sync_modes": self.descriptor.supported_sync_modes(),
            "schema_source": self.schema.source,
            "schema": self.schema.to_json_schema(),
        });
        if !related.is_empty() {
            entry["relations"] = json!(related);
        }
        entry
    }
}

/// Every entity discovered in this run
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(CatalogEntry::name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "streams": self.entries.iter().map(CatalogEntry::to_json).collect::<Vec<_>>(),
        })
    }
}
