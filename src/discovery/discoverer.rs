//! Entity discovery against the upstream
//!
//! The entity list must load or discovery fails as a whole. Each entity is
//! then described, sampled, or both; an entity that yields no schema at all
//! is skipped with a warning.

use super::types::{
    Catalog, CatalogEntry, DescribedEntity, DiscoverySettings, EntityDescriptor, EntityHints,
};
use crate::error::{Error, Result};
use crate::http::{ApiRequest, Transport};
use crate::pagination::{records_in, PaginationSettings};
use crate::schema::{is_timestamp_name, FieldMetadata, FieldType, RecordSchema, SchemaGenerator};
use crate::types::{lookup_path, JsonObject};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Replication keys tried in order before falling back to name patterns
const PREFERRED_REPLICATION_KEYS: &[&str] = &[
    "mod_ts",
    "updated_at",
    "modified_at",
    "last_modified",
    "modified",
    "updated",
];

/// Discovers entities and their schemas
pub struct EntityDiscoverer {
    transport: Arc<dyn Transport>,
    settings: DiscoverySettings,
    pagination: PaginationSettings,
    generator: SchemaGenerator,
    hints: BTreeMap<String, EntityHints>,
}

impl EntityDiscoverer {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: DiscoverySettings,
        pagination: PaginationSettings,
    ) -> Self {
        let generator = SchemaGenerator::new(settings.max_depth, settings.separator.clone());
        Self {
            transport,
            settings,
            pagination,
            generator,
            hints: BTreeMap::new(),
        }
    }

    /// Pin keys for entities instead of detecting them
    #[must_use]
    pub fn with_hints(mut self, hints: BTreeMap<String, EntityHints>) -> Self {
        self.hints = hints;
        self
    }

    pub fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    /// Confirm the entity list endpoint answers; returns the entity count
    pub async fn check(&self) -> Result<usize> {
        Ok(self.list_entities().await?.len())
    }

    /// Names and endpoints of every entity the upstream lists
    ///
    /// Accepts a list of names, a list of `{name, endpoint|url}` objects,
    /// or a `name -> url` map. Any failure here is fatal for discovery.
    pub async fn list_entities(&self) -> Result<Vec<(String, String)>> {
        let request = ApiRequest::new(&self.settings.entities_path);
        let response = self
            .transport
            .execute(&request)
            .await
            .map_err(|e| Error::discovery(format!("entity list unavailable: {e}")))?;

        let entities = parse_entity_list(&response.body, &self.settings);
        if entities.is_empty() {
            return Err(Error::discovery(format!(
                "entity list at '{}' names no entities",
                self.settings.entities_path
            )));
        }

        debug!(count = entities.len(), "listed entities");
        Ok(entities)
    }

    /// Fetch and parse an entity's metadata
    pub async fn describe(&self, entity: &str, endpoint: &str) -> Result<DescribedEntity> {
        let path = self.settings.describe_path_for(entity, endpoint);
        let response = self.transport.execute(&ApiRequest::new(path)).await?;

        let described = parse_describe(&response.body);
        if described.fields.is_empty() {
            return Err(Error::discovery(format!(
                "describe response for '{entity}' lists no fields"
            )));
        }
        Ok(described)
    }

    /// Fetch up to `sample_size` records
    pub async fn sample(&self, endpoint: &str) -> Result<Vec<Value>> {
        let size = self.settings.sample_size;
        let request =
            ApiRequest::new(endpoint).query(&self.pagination.limit_param, size.to_string());
        let response = self.transport.execute(&request).await?;

        let records = records_in(&response.body, self.pagination.records_path.as_deref())
            .ok_or_else(|| Error::decode("sample response carries no record list"))?;
        Ok(records.iter().take(size as usize).cloned().collect())
    }

    /// Discover one entity through the describe/sample/hybrid fallback
    pub async fn discover_entity(&self, name: &str, endpoint: &str) -> Result<CatalogEntry> {
        let described = match self.describe(name, endpoint).await {
            Ok(described) => Some(described),
            Err(e) => {
                warn!(entity = %name, error = %e, "describe failed, falling back to sampling");
                None
            }
        };

        let samples = match &described {
            Some(_) if !self.settings.hybrid => Vec::new(),
            Some(_) => self.sample(endpoint).await.unwrap_or_else(|e| {
                debug!(entity = %name, error = %e, "hybrid sample unavailable");
                Vec::new()
            }),
            None => self.sample(endpoint).await.map_err(|e| {
                Error::discovery(format!("no metadata and sampling failed: {e}")).for_entity(name)
            })?,
        };

        let metadata = described.as_ref().map(|d| d.fields.as_slice());
        let schema = self.generator.generate(name, metadata, &samples)?;

        let descriptor = self.descriptor(name, endpoint, described.as_ref(), &schema);
        info!(
            entity = %name,
            source = ?schema.source,
            fields = schema.len(),
            replication_key = ?descriptor.replication_key,
            "entity discovered"
        );

        Ok(CatalogEntry {
            descriptor,
            schema,
            fields: described.map(|d| d.fields).unwrap_or_default(),
        })
    }

    /// Build the catalog
    ///
    /// `selected` limits discovery to the named entities; empty means all.
    /// Names the upstream does not list are left for catalog validation.
    pub async fn discover(&self, selected: &[String]) -> Result<Catalog> {
        let listed = self.list_entities().await?;
        let wanted: Vec<(String, String)> = listed
            .into_iter()
            .filter(|(name, _)| selected.is_empty() || selected.contains(name))
            .collect();

        let results: Vec<(String, Result<CatalogEntry>)> = stream::iter(wanted)
            .map(|(name, endpoint)| async move {
                let result = self.discover_entity(&name, &endpoint).await;
                (name, result)
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut catalog = Catalog::default();
        for (name, result) in results {
            match result {
                Ok(entry) => catalog.entries.push(entry),
                Err(e) => warn!(entity = %name, error = %e, "skipping entity without a usable schema"),
            }
        }

        info!(entities = catalog.len(), "discovery complete");
        Ok(catalog)
    }

    fn descriptor(
        &self,
        name: &str,
        endpoint: &str,
        described: Option<&DescribedEntity>,
        schema: &RecordSchema,
    ) -> EntityDescriptor {
        let hints = self.hints.get(name);

        let primary_key = hints
            .and_then(|h| h.primary_key.clone())
            .or_else(|| described.and_then(|d| d.primary_key.clone()))
            .unwrap_or_else(|| {
                if schema.contains("id") {
                    vec!["id".to_string()]
                } else {
                    Vec::new()
                }
            });

        let replication_key = hints
            .and_then(|h| h.replication_key.clone())
            .or_else(|| described.and_then(|d| d.replication_key.clone()))
            .or_else(|| detect_replication_key(schema));

        let descriptor = EntityDescriptor::new(name, endpoint).with_primary_key(primary_key);
        match replication_key {
            Some(key) => descriptor.with_replication_key(key),
            None => descriptor,
        }
    }
}

impl std::fmt::Debug for EntityDiscoverer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDiscoverer")
            .field("settings", &self.settings)
            .field("hints", &self.hints)
            .finish_non_exhaustive()
    }
}

/// Pick a replication key from the schema's field names
pub fn detect_replication_key(schema: &RecordSchema) -> Option<String> {
    let datetime = |path: &str| {
        schema
            .get(path)
            .is_some_and(|field| field.field_type == FieldType::Datetime)
    };

    PREFERRED_REPLICATION_KEYS
        .iter()
        .find(|&&key| datetime(key))
        .map(|key| (*key).to_string())
        .or_else(|| {
            schema
                .fields
                .keys()
                .find(|path| {
                    let lowered = path.to_ascii_lowercase();
                    (lowered.contains("mod") || lowered.contains("updat"))
                        && is_timestamp_name(path)
                        && datetime(path.as_str())
                })
                .cloned()
        })
}

// ============================================================================
// Response Parsing
// ============================================================================

fn parse_entity_list(body: &Value, settings: &DiscoverySettings) -> Vec<(String, String)> {
    let items = match body {
        Value::Object(map) => match ["results", "entities", "data"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
        {
            Some(items) => items,
            // `name -> url` map
            None => {
                return map
                    .iter()
                    .filter_map(|(name, url)| Some((name.clone(), url.as_str()?.to_string())))
                    .collect();
            }
        },
        Value::Array(items) => items,
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) => Some((name.clone(), settings.endpoint_for(name))),
            Value::Object(entry) => {
                let name = entry.get("name").and_then(Value::as_str)?;
                let endpoint = ["endpoint", "url", "path"]
                    .iter()
                    .find_map(|key| entry.get(*key).and_then(Value::as_str))
                    .map_or_else(|| settings.endpoint_for(name), ToString::to_string);
                Some((name.to_string(), endpoint))
            }
            _ => None,
        })
        .collect()
}

/// Parse a describe body
///
/// Fields come as a list of objects with a `name`, or as a `name -> entry`
/// map, under `fields` (or as the body itself).
pub(super) fn parse_describe(body: &Value) -> DescribedEntity {
    let fields_value = lookup_path(body, "fields").unwrap_or(body);
    let fields = match fields_value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let entry = item.as_object()?;
                let name = entry.get("name").and_then(Value::as_str)?;
                Some(parse_field(name, entry))
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(name, entry)| Some(parse_field(name, entry.as_object()?)))
            .collect(),
        _ => Vec::new(),
    };

    let primary_key = ["primary_key", "pk"]
        .iter()
        .find_map(|key| body.get(*key))
        .and_then(|pk| match pk {
            Value::String(key) => Some(vec![key.clone()]),
            Value::Array(keys) => Some(
                keys.iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect(),
            ),
            _ => None,
        })
        .filter(|keys: &Vec<String>| !keys.is_empty());

    let replication_key = ["replication_key", "cursor_field"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(ToString::to_string);

    DescribedEntity {
        fields,
        primary_key,
        replication_key,
    }
}

fn parse_field(name: &str, entry: &JsonObject) -> FieldMetadata {
    let declared_type = ["type", "declared_type", "data_type"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_str))
        .and_then(FieldType::from_declared);

    let mut field = FieldMetadata::new(name, declared_type);
    field.required = entry
        .get("required")
        .and_then(Value::as_bool)
        .or_else(|| entry.get("nullable").and_then(Value::as_bool).map(|n| !n))
        .unwrap_or(false);
    field.max_length = entry.get("max_length").and_then(Value::as_u64);
    field.enum_values = ["enum", "choices"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_array))
        .map(|choices| {
            choices
                .iter()
                .map(|choice| choice.get("value").cloned().unwrap_or_else(|| choice.clone()))
                .collect()
        });
    field.related_entity = ["related_entity", "related_model", "foreign_key"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_str))
        .map(ToString::to_string);
    field
}
