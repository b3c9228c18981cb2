//! # Model Adapters
//!
//! The seam between models and storage engines.
//!
//! - [`ModelAdapter`]: record storage (`get`, `put`, `delete`, `allocate_ids`)
//!   plus the high-level model operations built on top of it
//! - [`IndexedModelAdapter`]: index generation, write, clean and queries
//! - [`AdapterRegistry`]: explicit adapter resolution by name
//!
//! Adapters are shared behind `Arc` and must be `Send + Sync`. Each adapter
//! keeps a [`KindRegistry`] of the schemas bound to it, so that records can be
//! inflated back into models on read.

pub mod index;
pub mod inmemory;
mod planner;
pub mod redis;

pub use index::{IndexBundle, IndexEntry, IndexName};
pub use inmemory::InMemoryAdapter;
pub use redis::RedisAdapter;

use crate::key::{Key, KeyId};
use crate::model::{EntityData, Model};
use crate::primitives::MAGIC_KEY;
use crate::query::{Query, QueryOptions, QueryResult};
use crate::schema::Schema;
use crate::types::ModelError;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

// =============================================================================
// ID ALLOCATION
// =============================================================================

/// Result of `allocate_ids`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdAllocation {
    Single(u64),
    /// Contiguous block of ids, yielded lazily.
    Range(Range<u64>),
}

impl IdAllocation {
    /// Build the allocation for a counter that was just advanced to `last`.
    pub(crate) fn ending_at(last: u64, count: u64) -> Result<Self, ModelError> {
        if count == 0 {
            return Err(ModelError::InvalidQuery(
                "cannot allocate zero ids".to_string(),
            ));
        }
        if count == 1 {
            return Ok(Self::Single(last));
        }
        Ok(Self::Range((last + 1 - count)..(last + 1)))
    }

    #[must_use]
    pub fn first(&self) -> u64 {
        match self {
            Self::Single(id) => *id,
            Self::Range(range) => range.start,
        }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Single(_) => 1,
            Self::Range(range) => range.end - range.start,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IntoIterator for IdAllocation {
    type Item = u64;
    type IntoIter = Range<u64>;

    fn into_iter(self) -> Self::IntoIter {
        match self {
            Self::Single(id) => id..id + 1,
            Self::Range(range) => range,
        }
    }
}

// =============================================================================
// METADATA
// =============================================================================

/// Adapter operations that are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Put,
    Delete,
    Query,
    Allocate,
}

/// Process-local operation counters.
#[derive(Debug, Default)]
pub struct OperationCounters {
    get: AtomicU64,
    put: AtomicU64,
    delete: AtomicU64,
    query: AtomicU64,
    allocate: AtomicU64,
}

impl OperationCounters {
    pub fn record(&self, operation: Operation) {
        let counter = match operation {
            Operation::Get => &self.get,
            Operation::Put => &self.put,
            Operation::Delete => &self.delete,
            Operation::Query => &self.query,
            Operation::Allocate => &self.allocate,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> OperationCounts {
        OperationCounts {
            get: self.get.load(Ordering::Relaxed),
            put: self.put.load(Ordering::Relaxed),
            delete: self.delete.load(Ordering::Relaxed),
            query: self.query.load(Ordering::Relaxed),
            allocate: self.allocate.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationCounts {
    pub get: u64,
    pub put: u64,
    pub delete: u64,
    pub query: u64,
    pub allocate: u64,
}

/// Bookkeeping reported by `ModelAdapter::metadata`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdapterMetadata {
    pub adapter: String,
    pub ops: OperationCounts,
    /// Stored entities per kind.
    pub kinds: BTreeMap<String, u64>,
    /// Stored entities overall.
    pub entities: u64,
}

// =============================================================================
// KIND REGISTRY
// =============================================================================

/// Schemas bound to one adapter, by kind.
///
/// Holds weak references: schemas own their adapter, not the reverse.
#[derive(Default)]
pub struct KindRegistry {
    kinds: RwLock<BTreeMap<String, Weak<Schema>>>,
}

impl KindRegistry {
    pub fn register(&self, schema: &Arc<Schema>) {
        let previous = self
            .kinds
            .write()
            .insert(schema.kind().to_string(), Arc::downgrade(schema));
        if previous.is_some_and(|weak| weak.strong_count() > 0) {
            tracing::warn!(kind = schema.kind(), "kind re-registered; replacing schema");
        }
    }

    /// Live schema for `kind`, if one is bound.
    #[must_use]
    pub fn resolve(&self, kind: &str) -> Option<Arc<Schema>> {
        self.kinds.read().get(kind).and_then(Weak::upgrade)
    }

    /// Converter tag for keys of `kind` appearing as property values.
    ///
    /// Resolved at write time: binding `kind` as a vertex or edge later does
    /// not retag entries already written. Key lookups read every tag.
    #[must_use]
    pub fn role_tag(&self, kind: &str) -> u8 {
        self.resolve(kind)
            .map(|schema| schema.role().magic_tag())
            .unwrap_or(MAGIC_KEY)
    }

    /// Kinds with a live schema.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        self.kinds
            .read()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(kind, _)| kind.clone())
            .collect()
    }
}

impl fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

// =============================================================================
// MODEL ADAPTER
// =============================================================================

/// Record storage for models.
///
/// Implementors provide the low-level record operations; the `*_model`
/// methods wrap them with key encoding, validation, id allocation and
/// inflation. Unimplemented record operations fail with `NotImplemented`.
pub trait ModelAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn registry(&self) -> &KindRegistry;

    fn counters(&self) -> &OperationCounters;

    /// Stored values for `key`.
    fn get(&self, key: &Key) -> Result<Option<EntityData>, ModelError> {
        Err(not_implemented(self.name(), "get", key))
    }

    /// Stored values for several keys, aligned with the input.
    fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<EntityData>>, ModelError> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Store `data` under a complete key and return that key.
    fn put(&self, key: &Key, data: &EntityData, schema: &Schema) -> Result<Key, ModelError> {
        let _ = (data, schema);
        Err(not_implemented(self.name(), "put", key))
    }

    /// Remove the record under `key`. Returns whether it existed.
    fn delete(&self, key: &Key) -> Result<bool, ModelError> {
        Err(not_implemented(self.name(), "delete", key))
    }

    /// Reserve `count` new integer ids for `kind`.
    fn allocate_ids(&self, kind: &str, count: u64) -> Result<IdAllocation, ModelError> {
        let _ = count;
        Err(ModelError::NotImplemented(format!(
            "{}::allocate_ids({})",
            self.name(),
            kind
        )))
    }

    /// Adapter-specific key encoding; `None` defers to the URL-safe form.
    fn encode_key(&self, key: &Key) -> Option<String> {
        let _ = key;
        None
    }

    /// Inverse of `encode_key`.
    fn decode_key(&self, encoded: &str) -> Result<Key, ModelError> {
        Key::from_urlsafe(encoded)
    }

    /// Stored entity count per kind.
    fn entity_counts(&self) -> Result<BTreeMap<String, u64>, ModelError> {
        Ok(BTreeMap::new())
    }

    /// Query support, if this adapter maintains indexes.
    fn as_indexed(&self) -> Option<&dyn IndexedModelAdapter> {
        None
    }

    // -------------------------------------------------------------------------
    // Provided
    // -------------------------------------------------------------------------

    fn register(&self, schema: &Arc<Schema>) {
        self.registry().register(schema);
    }

    /// Storage form of `key` for this adapter.
    fn key_string(&self, key: &Key) -> String {
        self.encode_key(key).unwrap_or_else(|| key.urlsafe())
    }

    fn metadata(&self) -> Result<AdapterMetadata, ModelError> {
        let kinds = self.entity_counts()?;
        Ok(AdapterMetadata {
            adapter: self.name().to_string(),
            ops: self.counters().snapshot(),
            entities: kinds.values().sum(),
            kinds,
        })
    }

    /// Rebuild a model of a registered kind from stored values.
    fn inflate(&self, key: &Key, data: EntityData) -> Result<Model, ModelError> {
        let schema = self
            .registry()
            .resolve(key.kind())
            .ok_or_else(|| ModelError::UnknownKind(key.kind().to_string()))?;
        Ok(Model::from_stored(schema, key.persisted_copy(), data))
    }

    /// Fetch and inflate one model.
    fn get_model(&self, key: &Key) -> Result<Option<Model>, ModelError> {
        self.counters().record(Operation::Get);
        match self.get(key)? {
            Some(data) => self.inflate(key, data).map(Some),
            None => Ok(None),
        }
    }

    /// Fetch and inflate several models, aligned with the input.
    fn get_models(&self, keys: &[Key]) -> Result<Vec<Option<Model>>, ModelError> {
        self.counters().record(Operation::Get);
        keys.iter()
            .zip(self.get_multi(keys)?)
            .map(|(key, record)| record.map(|data| self.inflate(key, data)).transpose())
            .collect()
    }

    /// Validate, allocate an id when needed, store, and mark persisted.
    fn put_model(&self, model: &mut Model) -> Result<Key, ModelError> {
        model.validate()?;

        let mut key = model.key().clone();
        if !key.is_complete() {
            let id = self.allocate_ids(key.kind(), 1)?.first();
            key.set_id(KeyId::Int(id))?;
        }

        let written = self.put(&key, &model.stored(), model.schema())?;
        self.counters().record(Operation::Put);
        tracing::debug!(adapter = self.name(), key = %written, "model stored");

        model.mark_persisted(written.clone());
        Ok(written.persisted_copy())
    }

    fn delete_model(&self, key: &Key) -> Result<bool, ModelError> {
        let existed = self.delete(key)?;
        self.counters().record(Operation::Delete);
        tracing::debug!(adapter = self.name(), key = %key, existed, "model deleted");
        Ok(existed)
    }
}

fn not_implemented(adapter: &str, op: &str, key: &Key) -> ModelError {
    ModelError::NotImplemented(format!("{}::{}({})", adapter, op, key))
}

// =============================================================================
// INDEXED MODEL ADAPTER
// =============================================================================

/// A model adapter that maintains secondary indexes and answers queries.
///
/// `write_indexes(generate_indexes(k, Some(d)))` followed by
/// `clean_indexes(generate_indexes(k, None))` must leave the index store as
/// it was before the write.
pub trait IndexedModelAdapter: ModelAdapter {
    /// Add every entry of `bundle` and record it in the reverse index.
    fn write_indexes(&self, bundle: &IndexBundle) -> Result<(), ModelError>;

    /// Remove every entry recorded in the reverse index for `bundle.encoded`.
    fn clean_indexes(&self, bundle: &IndexBundle) -> Result<(), ModelError>;

    fn execute_query(
        &self,
        schema: &Arc<Schema>,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<QueryResult, ModelError>;

    /// Rewrite the indexes of every stored record. Returns the record count.
    fn reindex(&self) -> Result<usize, ModelError>;

    /// Index entries for `key`; without `data`, only meta and role entries.
    fn generate_indexes(
        &self,
        key: &Key,
        schema: &Schema,
        data: Option<&EntityData>,
    ) -> IndexBundle {
        index::generate(
            self.registry(),
            &|k| self.key_string(k),
            key,
            schema,
            data,
        )
    }

    /// Count and run a query.
    fn run_query(
        &self,
        schema: &Arc<Schema>,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<QueryResult, ModelError> {
        self.counters().record(Operation::Query);
        self.execute_query(schema, query, options)
    }
}

// =============================================================================
// ADAPTER REGISTRY
// =============================================================================

/// Named adapters, resolved explicitly when schemas are bound.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<(String, Arc<dyn ModelAdapter>)>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. A second registration under a name replaces the first.
    pub fn register(&mut self, name: impl Into<String>, adapter: Arc<dyn ModelAdapter>) {
        let name = name.into();
        match self.adapters.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = adapter,
            None => self.adapters.push((name, adapter)),
        }
    }

    /// Resolve `explicit` by name, or the first registered adapter.
    pub fn acquire(&self, explicit: Option<&str>) -> Result<Arc<dyn ModelAdapter>, ModelError> {
        match explicit {
            Some(name) => self
                .adapters
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, adapter)| Arc::clone(adapter))
                .ok_or_else(|| ModelError::InvalidExplicitAdapter(name.to_string())),
            None => self
                .adapters
                .first()
                .map(|(_, adapter)| Arc::clone(adapter))
                .ok_or(ModelError::NoSupportedAdapters),
        }
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.adapters.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Adapter that implements nothing but the required accessors.
    #[derive(Default)]
    struct BareAdapter {
        registry: KindRegistry,
        counters: OperationCounters,
    }

    impl ModelAdapter for BareAdapter {
        fn name(&self) -> &str {
            "bare"
        }

        fn registry(&self) -> &KindRegistry {
            &self.registry
        }

        fn counters(&self) -> &OperationCounters {
            &self.counters
        }
    }

    #[test]
    fn allocation_shapes() {
        assert_eq!(
            IdAllocation::ending_at(7, 1).expect("alloc"),
            IdAllocation::Single(7)
        );
        let block = IdAllocation::ending_at(10, 10).expect("alloc");
        assert_eq!(block.first(), 1);
        assert_eq!(block.len(), 10);
        let ids: Vec<u64> = block.into_iter().collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
        assert!(IdAllocation::ending_at(3, 0).is_err());
    }

    #[test]
    fn unimplemented_operations_fail() {
        let adapter = BareAdapter::default();
        let key = Key::new("Thing", 1u64).expect("key");
        assert!(matches!(
            adapter.get(&key),
            Err(ModelError::NotImplemented(_))
        ));
        assert!(matches!(
            adapter.delete(&key),
            Err(ModelError::NotImplemented(_))
        ));
        assert!(matches!(
            adapter.allocate_ids("Thing", 1),
            Err(ModelError::NotImplemented(_))
        ));
        assert!(adapter.as_indexed().is_none());
    }

    #[test]
    fn registry_acquire_default_and_explicit() {
        let mut registry = AdapterRegistry::new();
        assert!(matches!(
            registry.acquire(None),
            Err(ModelError::NoSupportedAdapters)
        ));

        registry.register("bare", Arc::new(BareAdapter::default()));
        registry.register("memory", Arc::new(InMemoryAdapter::new()));
        assert_eq!(registry.acquire(None).expect("default").name(), "bare");
        assert_eq!(
            registry.acquire(Some("memory")).expect("explicit").name(),
            "inmemory"
        );
        assert!(matches!(
            registry.acquire(Some("nope")),
            Err(ModelError::InvalidExplicitAdapter(_))
        ));
    }

    #[test]
    fn kind_registry_drops_dead_schemas() {
        let adapter: Arc<dyn ModelAdapter> = Arc::new(BareAdapter::default());
        let schema = Schema::define("Ghost")
            .bind(Arc::clone(&adapter))
            .expect("bind");
        assert!(adapter.registry().resolve("Ghost").is_some());
        drop(schema);
        assert!(adapter.registry().resolve("Ghost").is_none());
        assert!(adapter.registry().kinds().is_empty());
    }

    #[test]
    fn counters_snapshot() {
        let counters = OperationCounters::default();
        counters.record(Operation::Get);
        counters.record(Operation::Get);
        counters.record(Operation::Query);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.get, 2);
        assert_eq!(snapshot.query, 1);
        assert_eq!(snapshot.put, 0);
    }
}
