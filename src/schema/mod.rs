//! Record schema module
//!
//! Converts discovery metadata and/or sample records into a normalized,
//! flattened [`RecordSchema`], and applies it to records at yield time.
//!
//! # Features
//!
//! - **Type Mapping**: Declared upstream types map onto canonical types
//! - **Sample Inference**: Union of observed types; absent fields become nullable
//! - **Hybrid Merge**: Declared types win, sampled-only fields are added
//! - **Flattening**: Nested objects become `parent_child` paths up to a depth
//! - **Timestamp Normalization**: Datetime fields rewritten to RFC 3339 UTC

mod generator;
mod transform;
mod types;

pub use generator::{is_timestamp_name, SchemaGenerator};
pub use transform::{flatten_record, normalize_datetime, RecordTransformer};
pub use types::{FieldMetadata, FieldSchema, FieldType, RecordSchema, SchemaSource};
