//! # canteen-model
//!
//! The model layer for Canteen - schema-driven entities over indexed storage.
//!
//! This crate implements:
//! - `Key`: kind, id and ancestry, with joined and URL-safe encodings
//! - `Schema` / `Property`: declared properties, validation, defaults
//! - `Model`: instances with dirty tracking and projection to JSON
//! - Vertex and edge schemas with adjacency indexes
//! - `ModelAdapter` / `IndexedModelAdapter`: the storage seam
//! - `InMemoryAdapter` and `RedisAdapter`: the two indexed adapters
//! - `Query`: filters, sorts and options executed against secondary indexes
//!
//! ## Architectural Constraints
//!
//! - Synchronous, no network dependencies (pure Rust)
//! - Adapters are `Send + Sync` and shared behind `Arc`
//! - A record write and its index writes never interleave with another writer
//! - The library emits `tracing` events but never installs a subscriber
//!
//! ## Example
//!
//! ```
//! use canteen_model::{Basetype, Filter, InMemoryAdapter, Property, Schema};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), canteen_model::ModelError> {
//! let adapter = Arc::new(InMemoryAdapter::new());
//! let person = Schema::define("Person")
//!     .property(Property::new("name", Basetype::String).required())
//!     .property(Property::new("age", Basetype::Int))
//!     .bind(adapter)?;
//!
//! let mut ada = person.create()?;
//! ada.set("name", "Ada")?;
//! ada.set("age", 36)?;
//! ada.put()?;
//!
//! let adults = person.query().filter(Filter::ge("age", 18)).fetch()?;
//! assert_eq!(adults.len(), 1);
//! # Ok(())
//! # }
//! ```

// =============================================================================
// MODULES
// =============================================================================

pub mod adapter;
pub mod config;
pub mod graph;
pub mod key;
pub mod model;
pub mod primitives;
pub mod query;
pub mod schema;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use key::{Key, KeyFormat, KeyId};
pub use model::{DictOptions, EntityData, Model};
pub use schema::{Property, Schema, SchemaBuilder};
pub use types::{Basetype, ModelError, Score, Value};

// =============================================================================
// RE-EXPORTS: Graph
// =============================================================================

pub use graph::{EdgeSpec, GraphToken, SchemaRole};

// =============================================================================
// RE-EXPORTS: Adapters and Storage
// =============================================================================

pub use adapter::{
    AdapterMetadata, AdapterRegistry, IdAllocation, InMemoryAdapter, IndexedModelAdapter,
    KindRegistry, ModelAdapter, OperationCounts, RedisAdapter,
};
pub use config::{AdapterConfig, RedisMode};
pub use storage::{KeyValueBackend, MemoryBackend, RedbBackend};

// =============================================================================
// RE-EXPORTS: Queries
// =============================================================================

pub use query::{
    Connector, Direction, EdgeFilter, Filter, KeyFilter, Operator, Query, QueryOptions,
    QueryResult, Sort,
};
