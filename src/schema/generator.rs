//! Schema generation from metadata and sample records
//!
//! Three ways in, one [`RecordSchema`] out:
//! - described metadata only
//! - sampled records only (types are the union of what was observed)
//! - hybrid, where sampled-only fields widen the described schema

use super::transform::flatten_record;
use super::types::{FieldMetadata, FieldSchema, FieldType, RecordSchema, SchemaSource};
use crate::error::{Error, Result};
use crate::types::parse_timestamp;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

static TIMESTAMP_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(^|_)(ts|timestamp|datetime)$|_(at|on|date|time)$|^(mod|modified|created|updated|deleted|last_modified)$",
    )
    .expect("valid timestamp-name regex")
});

/// Whether a field name follows a creation/modification timestamp convention
pub fn is_timestamp_name(name: &str) -> bool {
    TIMESTAMP_NAME.is_match(name)
}

/// Builds record schemas with one flattening configuration
#[derive(Debug, Clone)]
pub struct SchemaGenerator {
    max_depth: usize,
    separator: String,
}

impl Default for SchemaGenerator {
    fn default() -> Self {
        Self::new(3, "_")
    }
}

impl SchemaGenerator {
    pub fn new(max_depth: usize, separator: impl Into<String>) -> Self {
        Self {
            max_depth: max_depth.max(1),
            separator: separator.into(),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Pick the richest schema the inputs allow
    ///
    /// Metadata plus samples gives a hybrid, either one alone gives a
    /// described or inferred schema.
    pub fn generate(
        &self,
        entity: &str,
        metadata: Option<&[FieldMetadata]>,
        samples: &[Value],
    ) -> Result<RecordSchema> {
        match metadata {
            Some(fields) if !fields.is_empty() && !samples.is_empty() => {
                self.hybrid(entity, fields, samples)
            }
            Some(fields) if !fields.is_empty() => self.from_metadata(entity, fields),
            _ => self.from_samples(entity, samples),
        }
    }

    /// Schema straight from described metadata
    pub fn from_metadata(&self, entity: &str, fields: &[FieldMetadata]) -> Result<RecordSchema> {
        if fields.is_empty() {
            return Err(Error::schema(entity, "metadata lists no fields"));
        }

        let fields = fields
            .iter()
            .filter(|field| !field.name.is_empty())
            .map(|field| (field.name.clone(), self.declared_field(field)))
            .collect();

        Ok(self.schema(entity, fields, SchemaSource::Described))
    }

    /// Schema inferred from sampled records
    pub fn from_samples(&self, entity: &str, samples: &[Value]) -> Result<RecordSchema> {
        let mut inferrer = SampleInferrer::default();
        for sample in samples {
            if let Value::Object(record) = sample {
                inferrer.observe(&flatten_record(record, self.max_depth, &self.separator));
            }
        }

        if inferrer.record_count == 0 {
            return Err(Error::schema(entity, "no object records to infer from"));
        }
        let fields = inferrer.finish();
        if fields.is_empty() {
            return Err(Error::schema(entity, "sampled records have no fields"));
        }

        Ok(self.schema(entity, fields, SchemaSource::Inferred))
    }

    /// Described schema widened by fields only the samples show
    ///
    /// Declared types win. A declared object whose sampled contents were
    /// flattened is replaced by those flattened paths.
    pub fn hybrid(
        &self,
        entity: &str,
        metadata: &[FieldMetadata],
        samples: &[Value],
    ) -> Result<RecordSchema> {
        let described = self.from_metadata(entity, metadata)?;
        let Ok(inferred) = self.from_samples(entity, samples) else {
            return Ok(described);
        };

        let mut fields = described.fields;
        let mut widened = false;

        let flattened_objects: Vec<String> = fields
            .iter()
            .filter(|(_, field)| field.field_type == FieldType::Object)
            .map(|(path, _)| path.clone())
            .filter(|path| {
                let prefix = format!("{path}{}", self.separator);
                inferred.fields.keys().any(|key| key.starts_with(&prefix))
            })
            .collect();
        for path in flattened_objects {
            fields.remove(&path);
            widened = true;
        }

        for (path, field) in inferred.fields {
            if !fields.contains_key(&path) {
                fields.insert(path, field.make_nullable());
                widened = true;
            }
        }

        let source = if widened {
            SchemaSource::Hybrid
        } else {
            SchemaSource::Described
        };
        Ok(self.schema(entity, fields, source))
    }

    fn declared_field(&self, field: &FieldMetadata) -> FieldSchema {
        let declared = field.declared_type.unwrap_or(FieldType::String);
        let field_type = if timestamp_candidate(declared) && is_timestamp_name(&field.name) {
            FieldType::Datetime
        } else {
            declared
        };

        let mut schema = FieldSchema::new(field_type);
        schema.nullable = !field.required;
        schema.max_length = field.max_length;
        schema.enum_values = field.enum_values.clone();
        schema
    }

    fn schema(
        &self,
        entity: &str,
        fields: BTreeMap<String, FieldSchema>,
        source: SchemaSource,
    ) -> RecordSchema {
        RecordSchema {
            entity: entity.to_string(),
            fields,
            source,
            max_depth: self.max_depth,
            separator: self.separator.clone(),
        }
    }
}

fn timestamp_candidate(ty: FieldType) -> bool {
    matches!(
        ty,
        FieldType::String | FieldType::Integer | FieldType::Number | FieldType::Datetime
    )
}

// ============================================================================
// Sample Inference
// ============================================================================

#[derive(Debug, Default)]
struct Observed {
    field_type: Option<FieldType>,
    items: Option<FieldType>,
    seen: usize,
    saw_null: bool,
    /// Every non-null value so far was a parseable timestamp string
    all_timestamps: bool,
}

#[derive(Debug, Default)]
struct SampleInferrer {
    record_count: usize,
    fields: BTreeMap<String, Observed>,
}

impl SampleInferrer {
    fn observe(&mut self, record: &serde_json::Map<String, Value>) {
        self.record_count += 1;

        for (path, value) in record {
            let observed = self.fields.entry(path.clone()).or_insert_with(|| Observed {
                all_timestamps: true,
                ..Observed::default()
            });
            observed.seen += 1;

            let Some(ty) = FieldType::of_value(value) else {
                observed.saw_null = true;
                continue;
            };

            observed.field_type = Some(match observed.field_type {
                Some(existing) => existing.merge(ty),
                None => ty,
            });
            observed.all_timestamps &= matches!(value, Value::String(s) if parse_timestamp(s).is_some());

            if let Value::Array(items) = value {
                for item in items {
                    if let Some(item_ty) = FieldType::of_value(item) {
                        observed.items = Some(match observed.items {
                            Some(existing) => existing.merge(item_ty),
                            None => item_ty,
                        });
                    }
                }
            }
        }
    }

    fn finish(self) -> BTreeMap<String, FieldSchema> {
        let total = self.record_count;
        self.fields
            .into_iter()
            .map(|(path, observed)| {
                let field_type = match observed.field_type {
                    // Never saw a value: untyped
                    None => FieldType::String,
                    Some(ty) if timestamp_candidate(ty) && is_timestamp_name(&path) => {
                        FieldType::Datetime
                    }
                    Some(FieldType::String) if observed.all_timestamps => FieldType::Datetime,
                    Some(ty) => ty,
                };

                let mut field = FieldSchema::new(field_type);
                field.nullable = observed.saw_null || observed.seen < total;
                if field_type == FieldType::Array {
                    field.items = observed.items;
                }
                (path, field)
            })
            .collect()
    }
}
