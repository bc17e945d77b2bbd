//! Entity discovery module
//!
//! Lists the upstream's entities and derives a schema for each through
//! three escalating strategies:
//!
//! 1. **Describe**: the entity's metadata endpoint, authoritative for types
//! 2. **Sample**: records fetched and typed by observation, when describe fails
//! 3. **Hybrid**: described metadata widened by fields only the samples show
//!
//! A failing entity list aborts discovery; a failing entity is skipped.

mod discoverer;
mod types;

pub use discoverer::{detect_replication_key, EntityDiscoverer};
pub use types::{
    Catalog, CatalogEntry, DescribedEntity, DiscoverySettings, EntityDescriptor, EntityHints,
};
