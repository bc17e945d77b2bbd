//! Per-record transformation
//!
//! Flattens a record the same way its schema was flattened, rewrites
//! datetime fields into one canonical form and checks the primary key.

use super::types::{FieldType, RecordSchema};
use crate::error::{Error, Result};
use crate::types::{format_timestamp, parse_timestamp, timestamp_from_epoch, JsonObject};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Flatten nested objects into `parent{separator}child` paths
///
/// Objects nested deeper than `max_depth` levels stay as opaque object
/// values, as do empty objects. Arrays are never expanded.
pub fn flatten_record(record: &JsonObject, max_depth: usize, separator: &str) -> JsonObject {
    let mut out = JsonObject::new();
    let flattener = Flattener {
        max_depth,
        separator,
        keep_whole: &|_| false,
    };
    flattener.flatten_into(&mut out, None, record, 1);
    out
}

struct Flattener<'a> {
    max_depth: usize,
    separator: &'a str,
    /// Paths that stay whole objects regardless of depth
    keep_whole: &'a dyn Fn(&str) -> bool,
}

impl Flattener<'_> {
    fn flatten_into(
        &self,
        out: &mut JsonObject,
        prefix: Option<&str>,
        object: &JsonObject,
        depth: usize,
    ) {
        for (key, value) in object {
            let path = match prefix {
                Some(prefix) => format!("{prefix}{}{key}", self.separator),
                None => key.clone(),
            };
            match value {
                Value::Object(nested)
                    if depth < self.max_depth && !nested.is_empty() && !(self.keep_whole)(&path) =>
                {
                    self.flatten_into(out, Some(&path), nested, depth + 1);
                }
                other => {
                    out.insert(path, other.clone());
                }
            }
        }
    }
}

/// Rewrite one raw timestamp into canonical RFC 3339 UTC text
///
/// Returns `None` when the value is not recognisably a timestamp.
pub fn normalize_datetime(value: &Value) -> Option<String> {
    let instant = match value {
        Value::String(raw) => match parse_timestamp(raw) {
            Some(ts) => Some(ts),
            None => raw.trim().parse::<f64>().ok().and_then(timestamp_from_epoch),
        },
        Value::Number(n) => n.as_f64().and_then(timestamp_from_epoch),
        _ => None,
    };
    instant.map(|ts| format_timestamp(&ts))
}

/// Applies one entity's schema to raw upstream records
#[derive(Debug, Clone)]
pub struct RecordTransformer {
    schema: Arc<RecordSchema>,
    primary_key: Vec<String>,
}

impl RecordTransformer {
    pub fn new(schema: Arc<RecordSchema>, primary_key: Vec<String>) -> Self {
        Self {
            schema,
            primary_key,
        }
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Transform one record
    ///
    /// Fields the schema does not know pass through untouched. Datetime
    /// values that cannot be parsed are left as received.
    pub fn transform(&self, record: &Value) -> Result<JsonObject> {
        let Value::Object(object) = record else {
            return Err(Error::validation(format!(
                "expected an object record for '{}', got {}",
                self.schema.entity,
                value_kind(record)
            )));
        };

        let schema = &self.schema;
        let keep_whole = |path: &str| {
            schema
                .get(path)
                .is_some_and(|field| field.field_type == FieldType::Object)
        };
        let flattener = Flattener {
            max_depth: schema.max_depth,
            separator: &schema.separator,
            keep_whole: &keep_whole,
        };
        let mut flat = JsonObject::new();
        flattener.flatten_into(&mut flat, None, object, 1);

        for path in self.schema.datetime_fields() {
            let Some(value) = flat.get_mut(path) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            match normalize_datetime(value) {
                Some(canonical) => *value = Value::String(canonical),
                None => debug!(entity = %self.schema.entity, field = path, "unparseable datetime left as-is"),
            }
        }

        for key in &self.primary_key {
            match flat.get(key) {
                None | Some(Value::Null) => {
                    return Err(Error::validation(format!(
                        "record for '{}' is missing primary key field '{key}'",
                        self.schema.entity
                    )));
                }
                Some(Value::String(s)) if s.is_empty() => {
                    return Err(Error::validation(format!(
                        "record for '{}' has an empty primary key field '{key}'",
                        self.schema.entity
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(flat)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
