//! Record schema types
//!
//! A [`RecordSchema`] maps flattened field paths to a canonical type and a
//! nullable flag. It is derived once per entity per run and never persisted.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Field Types
// ============================================================================

/// Canonical field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Datetime,
    Array,
    Object,
}

impl FieldType {
    /// Map an upstream-declared type name onto a canonical type
    ///
    /// Returns `None` for names that carry no usable type information.
    pub fn from_declared(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let ty = match lowered.as_str() {
            "string" | "str" | "text" | "char" | "varchar" | "uuid" | "email" | "url" | "slug" => {
                Self::String
            }
            "integer" | "int" | "bigint" | "smallint" | "long" | "autofield" | "bigautofield"
            | "positiveintegerfield" => Self::Integer,
            "number" | "float" | "double" | "decimal" | "numeric" | "real" => Self::Number,
            "boolean" | "bool" => Self::Boolean,
            "datetime" | "date-time" | "timestamp" | "date" | "time" => Self::Datetime,
            "array" | "list" => Self::Array,
            "object" | "dict" | "json" | "map" | "nested object" => Self::Object,
            other if other.ends_with("field") => {
                return Self::from_declared(other.trim_end_matches("field"));
            }
            _ => return None,
        };
        Some(ty)
    }

    /// The type both `self` and `other` values fit into
    ///
    /// Integers widen to numbers, datetimes seen as plain text widen to
    /// strings, and anything else that disagrees becomes a string.
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Integer, Self::Number) | (Self::Number, Self::Integer) => Self::Number,
            _ => Self::String,
        }
    }

    /// JSON-Schema type name
    pub fn json_type(self) -> &'static str {
        match self {
            Self::String | Self::Datetime => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Type of a single JSON value; `None` for null
    pub fn of_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self::Integer),
            Value::Number(_) => Some(Self::Number),
            Value::String(_) => Some(Self::String),
            Value::Array(_) => Some(Self::Array),
            Value::Object(_) => Some(Self::Object),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Datetime => "datetime",
            other => other.json_type(),
        };
        f.write_str(name)
    }
}

// ============================================================================
// Field Metadata
// ============================================================================

/// One field as described by the upstream's metadata endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub name: String,
    /// `None` when the upstream gave no usable type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<FieldType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    /// Foreign-key target entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity: Option<String>,
}

impl FieldMetadata {
    pub fn new(name: impl Into<String>, declared_type: Option<FieldType>) -> Self {
        Self {
            name: name.into(),
            declared_type,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_max_length(mut self, max_length: u64) -> Self {
        self.max_length = Some(max_length);
        self
    }

    #[must_use]
    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    #[must_use]
    pub fn with_related_entity(mut self, entity: impl Into<String>) -> Self {
        self.related_entity = Some(entity.into());
        self
    }
}

// ============================================================================
// Field Schema
// ============================================================================

/// Type information for one flattened field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub nullable: bool,
    /// Element type for arrays; `Object` elements carry no further shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<FieldType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl FieldSchema {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            nullable: false,
            items: None,
            max_length: None,
            enum_values: None,
        }
    }

    pub fn nullable(field_type: FieldType) -> Self {
        Self::new(field_type).make_nullable()
    }

    #[must_use]
    pub fn make_nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn with_items(mut self, items: Option<FieldType>) -> Self {
        self.items = items;
        self
    }

    pub fn is_datetime(&self) -> bool {
        self.field_type == FieldType::Datetime
    }

    /// Render as a JSON-Schema property
    pub fn to_json_schema(&self) -> Value {
        let mut property = Map::new();
        let base = Value::String(self.field_type.json_type().to_string());
        let ty = if self.nullable {
            json!([base, "null"])
        } else {
            base
        };
        property.insert("type".to_string(), ty);

        if self.is_datetime() {
            property.insert("format".to_string(), json!("date-time"));
        }
        if self.field_type == FieldType::Array {
            let items = match self.items {
                Some(FieldType::Object) | None => json!({}),
                Some(item) => FieldSchema::new(item).to_json_schema(),
            };
            property.insert("items".to_string(), items);
        }
        if let Some(max_length) = self.max_length {
            property.insert("maxLength".to_string(), json!(max_length));
        }
        if let Some(values) = &self.enum_values {
            let mut values = values.clone();
            if self.nullable {
                values.push(Value::Null);
            }
            property.insert("enum".to_string(), Value::Array(values));
        }

        Value::Object(property)
    }
}

// ============================================================================
// Record Schema
// ============================================================================

/// Where an entity's schema came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaSource {
    /// Upstream metadata only
    Described,
    /// Sampled records only
    Inferred,
    /// Metadata widened with sampled-only fields
    Hybrid,
}

/// Normalized schema for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub entity: String,
    pub fields: BTreeMap<String, FieldSchema>,
    pub source: SchemaSource,
    /// Nesting levels flattened into top-level paths
    pub max_depth: usize,
    pub separator: String,
}

impl RecordSchema {
    pub fn get(&self, path: &str) -> Option<&FieldSchema> {
        self.fields.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.fields.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Paths of every datetime-typed field
    pub fn datetime_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, field)| field.is_datetime())
            .map(|(path, _)| path.as_str())
    }

    /// Compare type maps only, ignoring entity naming and provenance
    pub fn same_types(&self, other: &Self) -> bool {
        self.fields == other.fields
    }

    /// Render a JSON-Schema-like document for the downstream protocol
    ///
    /// Fields are never closed off: records may carry extra properties.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|(path, field)| (path.clone(), field.to_json_schema()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|(_, field)| !field.nullable)
            .map(|(path, _)| path.as_str())
            .collect();

        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": true,
        });
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        schema
    }
}
