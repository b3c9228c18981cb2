//! # In-Memory Adapter
//!
//! Reference [`IndexedModelAdapter`] over process memory.
//!
//! All state lives in one [`MemoryState`] behind a `parking_lot::RwLock`.
//! A put or delete takes the write lock once and performs the record write,
//! the reverse-index clean and the index write inside it. Queries run under
//! the read lock and see a consistent snapshot.

use crate::adapter::index::{IndexBundle, IndexEntry, IndexName};
use crate::adapter::planner::{self, IndexSource};
use crate::adapter::{
    IdAllocation, IndexedModelAdapter, KindRegistry, ModelAdapter, Operation, OperationCounters,
};
use crate::config::AdapterConfig;
use crate::key::Key;
use crate::model::EntityData;
use crate::query::{Query, QueryOptions, QueryResult};
use crate::schema::Schema;
use crate::types::{ModelError, Score};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

/// Process-local storage: records, index buckets, reverse index and id counters.
#[derive(Debug, Default)]
struct MemoryState {
    /// Encoded key -> stored values.
    datastore: BTreeMap<String, EntityData>,
    sets: BTreeMap<IndexName, BTreeSet<String>>,
    /// Sorted buckets: score -> members at that score.
    series: BTreeMap<IndexName, BTreeMap<Score, BTreeSet<String>>>,
    /// Encoded key -> every entry written for it.
    reverse: BTreeMap<String, BTreeSet<IndexEntry>>,
    /// Kind -> last allocated id.
    ids: BTreeMap<String, u64>,
}

impl MemoryState {
    fn add(&mut self, entry: &IndexEntry) {
        match entry.score {
            Some(score) => {
                self.series
                    .entry(entry.name.clone())
                    .or_default()
                    .entry(score)
                    .or_default()
                    .insert(entry.member.clone());
            }
            None => {
                self.sets
                    .entry(entry.name.clone())
                    .or_default()
                    .insert(entry.member.clone());
            }
        }
    }

    fn remove(&mut self, entry: &IndexEntry) {
        match entry.score {
            Some(score) => {
                let Some(bucket) = self.series.get_mut(&entry.name) else {
                    return;
                };
                if let Some(members) = bucket.get_mut(&score) {
                    members.remove(&entry.member);
                    if members.is_empty() {
                        bucket.remove(&score);
                    }
                }
                if bucket.is_empty() {
                    self.series.remove(&entry.name);
                }
            }
            None => {
                let Some(members) = self.sets.get_mut(&entry.name) else {
                    return;
                };
                members.remove(&entry.member);
                if members.is_empty() {
                    self.sets.remove(&entry.name);
                }
            }
        }
    }

    fn write_bundle(&mut self, bundle: &IndexBundle) {
        let entries = bundle.entries();
        for entry in &entries {
            tracing::trace!(bucket = %entry.name.render(), member = %entry.member, "index write");
            self.add(entry);
        }
        self.reverse
            .entry(bundle.encoded.clone())
            .or_default()
            .extend(entries);
    }

    /// Remove everything recorded for `encoded`.
    fn clean_key(&mut self, encoded: &str) {
        let Some(entries) = self.reverse.remove(encoded) else {
            return;
        };
        for entry in &entries {
            tracing::trace!(bucket = %entry.name.render(), member = %entry.member, "index clean");
            self.remove(entry);
        }
    }

    fn entries(&self) -> BTreeSet<IndexEntry> {
        let sets = self.sets.iter().flat_map(|(name, members)| {
            members.iter().map(|member| IndexEntry {
                name: name.clone(),
                member: member.clone(),
                score: None,
            })
        });
        let series = self.series.iter().flat_map(|(name, bucket)| {
            bucket.iter().flat_map(move |(score, members)| {
                members.iter().map(move |member| IndexEntry {
                    name: name.clone(),
                    member: member.clone(),
                    score: Some(*score),
                })
            })
        });
        sets.chain(series).collect()
    }
}

// =============================================================================
// ADAPTER
// =============================================================================

/// Indexed adapter keeping everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryAdapter {
    config: AdapterConfig,
    registry: KindRegistry,
    counters: OperationCounters,
    state: RwLock<MemoryState>,
}

impl InMemoryAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: AdapterConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Every index entry currently stored, sorted.
    #[must_use]
    pub fn index_snapshot(&self) -> Vec<IndexEntry> {
        self.state.read().entries().into_iter().collect()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().datastore.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record, index and counter.
    pub fn clear(&self) {
        *self.state.write() = MemoryState::default();
    }
}

impl ModelAdapter for InMemoryAdapter {
    fn name(&self) -> &str {
        "inmemory"
    }

    fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    fn counters(&self) -> &OperationCounters {
        &self.counters
    }

    fn get(&self, key: &Key) -> Result<Option<EntityData>, ModelError> {
        let encoded = self.key_string(key);
        tracing::debug!(adapter = "inmemory", key = %key, "get");
        Ok(self.state.read().datastore.get(&encoded).cloned())
    }

    fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<EntityData>>, ModelError> {
        let encoded: Vec<String> = keys.iter().map(|key| self.key_string(key)).collect();
        let state = self.state.read();
        Ok(encoded
            .iter()
            .map(|encoded| state.datastore.get(encoded).cloned())
            .collect())
    }

    fn put(&self, key: &Key, data: &EntityData, schema: &Schema) -> Result<Key, ModelError> {
        let bundle = self.generate_indexes(key, schema, Some(data));
        tracing::debug!(adapter = "inmemory", key = %key, entries = bundle.entries().len(), "put");

        let mut state = self.state.write();
        state.clean_key(&bundle.encoded);
        state.datastore.insert(bundle.encoded.clone(), data.clone());
        state.write_bundle(&bundle);
        Ok(key.clone())
    }

    fn delete(&self, key: &Key) -> Result<bool, ModelError> {
        let encoded = self.key_string(key);
        tracing::debug!(adapter = "inmemory", key = %key, "delete");

        let mut state = self.state.write();
        let existed = state.datastore.remove(&encoded).is_some();
        state.clean_key(&encoded);
        Ok(existed)
    }

    fn allocate_ids(&self, kind: &str, count: u64) -> Result<IdAllocation, ModelError> {
        let last = {
            let mut state = self.state.write();
            let counter = state.ids.entry(kind.to_string()).or_insert(0);
            *counter = counter.checked_add(count).ok_or_else(|| {
                ModelError::StorageError(format!("id space exhausted for kind \"{}\"", kind))
            })?;
            *counter
        };
        self.counters.record(Operation::Allocate);
        tracing::debug!(adapter = "inmemory", kind, count, last, "allocate");
        IdAllocation::ending_at(last, count)
    }

    fn entity_counts(&self) -> Result<BTreeMap<String, u64>, ModelError> {
        let state = self.state.read();
        Ok(state
            .sets
            .iter()
            .filter_map(|(name, members)| match name {
                IndexName::Kind(kind) => Some((kind.clone(), members.len() as u64)),
                _ => None,
            })
            .collect())
    }

    fn as_indexed(&self) -> Option<&dyn IndexedModelAdapter> {
        Some(self)
    }
}

impl IndexedModelAdapter for InMemoryAdapter {
    fn write_indexes(&self, bundle: &IndexBundle) -> Result<(), ModelError> {
        self.state.write().write_bundle(bundle);
        Ok(())
    }

    fn clean_indexes(&self, bundle: &IndexBundle) -> Result<(), ModelError> {
        self.state.write().clean_key(&bundle.encoded);
        Ok(())
    }

    fn execute_query(
        &self,
        schema: &Arc<Schema>,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<QueryResult, ModelError> {
        tracing::debug!(adapter = "inmemory", kind = schema.kind(), "query");
        let state = self.state.read();
        let snapshot = Snapshot {
            adapter: self,
            state: &state,
        };
        planner::execute(&snapshot, &self.registry, &self.config, schema, query, options)
    }

    fn reindex(&self) -> Result<usize, ModelError> {
        let mut state = self.state.write();
        state.sets.clear();
        state.series.clear();
        state.reverse.clear();

        let records: Vec<(String, EntityData)> = state
            .datastore
            .iter()
            .map(|(encoded, data)| (encoded.clone(), data.clone()))
            .collect();
        let mut count = 0;
        for (encoded, data) in records {
            let key = self.decode_key(&encoded)?;
            let Some(schema) = self.registry.resolve(key.kind()) else {
                tracing::warn!(key = %key, "record of unregistered kind left unindexed");
                continue;
            };
            state.write_bundle(&self.generate_indexes(&key, &schema, Some(&data)));
            count += 1;
        }
        tracing::info!(adapter = "inmemory", records = count, "reindex complete");
        Ok(count)
    }
}

/// Read view over the state for one query.
struct Snapshot<'a> {
    adapter: &'a InMemoryAdapter,
    state: &'a MemoryState,
}

impl IndexSource for Snapshot<'_> {
    fn set_members(&self, name: &IndexName) -> Result<BTreeSet<String>, ModelError> {
        Ok(self.state.sets.get(name).cloned().unwrap_or_default())
    }

    fn range_members(
        &self,
        name: &IndexName,
        low: Bound<Score>,
        high: Bound<Score>,
    ) -> Result<BTreeSet<String>, ModelError> {
        let Some(bucket) = self.state.series.get(name) else {
            return Ok(BTreeSet::new());
        };
        Ok(bucket
            .range((low, high))
            .flat_map(|(_, members)| members.iter().cloned())
            .collect())
    }

    fn fetch_records(&self, encoded: &[String]) -> Result<Vec<Option<EntityData>>, ModelError> {
        Ok(encoded
            .iter()
            .map(|encoded| self.state.datastore.get(encoded).cloned())
            .collect())
    }

    fn encode(&self, key: &Key) -> String {
        self.adapter.key_string(key)
    }

    fn decode(&self, encoded: &str) -> Result<Key, ModelError> {
        self.adapter.decode_key(encoded)
    }
}

// =============================================================================
// TESTS
// =============================================================================
