//! # Redis-Style Adapter
//!
//! [`IndexedModelAdapter`] mapping records and indexes onto Redis primitives,
//! executed by a [`KeyValueBackend`].
//!
//! ## Layout
//!
//! | Data            | Structure                                         |
//! |-----------------|---------------------------------------------------|
//! | record (toplevel) | `SET <encoded key> <json>`                      |
//! | record (hashkind) | `HSET <encoded kind key> <encoded key> <json>`  |
//! | record (hashkey)  | `HSET <encoded root key> <encoded key> <json>`  |
//! | set index       | `SADD <bucket> <encoded key>`                     |
//! | sorted index    | `ZADD <bucket> <score> <encoded key>`             |
//! | reverse index   | `SET __reverse__::<encoded key> <postcard>`       |
//! | id counter      | `HINCRBY __meta__::<encoded kind key> __id__ n`   |
//!
//! Every put or delete is one pipeline: stale index removals, the record
//! write and the new index entries commit together. A process-local write
//! lock keeps the read of the reverse index and the pipeline that depends on
//! it from interleaving with another writer.

use crate::adapter::index::{IndexBundle, IndexEntry, IndexName};
use crate::adapter::planner::{self, IndexSource};
use crate::adapter::{
    IdAllocation, IndexedModelAdapter, KindRegistry, ModelAdapter, Operation, OperationCounters,
};
use crate::config::{AdapterConfig, RedisMode};
use crate::key::Key;
use crate::model::EntityData;
use crate::primitives::{ID_FIELD, MAGIC_SEPARATOR, META_PREFIX, REVERSE_PREFIX};
use crate::query::{Query, QueryOptions, QueryResult};
use crate::schema::Schema;
use crate::storage::{Command, KeyValueBackend};
use crate::types::{ModelError, Score, Value};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

/// Internal names start with this; encoded keys never do.
const INTERNAL_MARKER: &str = "__";

/// Where one record lives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    String(String),
    Hash { key: String, field: String },
}

impl Slot {
    fn store(self, blob: Vec<u8>) -> Command {
        match self {
            Self::String(key) => Command::Set { key, value: blob },
            Self::Hash { key, field } => Command::HashSet {
                key,
                field,
                value: blob,
            },
        }
    }

    fn remove(self) -> Command {
        match self {
            Self::String(key) => Command::Delete { key },
            Self::Hash { key, field } => Command::HashDelete { key, field },
        }
    }
}

fn add_index(entry: &IndexEntry) -> Command {
    let key = entry.name.render();
    let member = entry.member.clone();
    match entry.score {
        Some(score) => Command::SortedAdd { key, score, member },
        None => Command::SetAdd { key, member },
    }
}

fn remove_index(entry: &IndexEntry) -> Command {
    let key = entry.name.render();
    let member = entry.member.clone();
    match entry.score {
        Some(score) => Command::SortedRemove { key, score, member },
        None => Command::SetRemove { key, member },
    }
}

fn reverse_key(encoded: &str) -> String {
    format!("{}{}{}", REVERSE_PREFIX, MAGIC_SEPARATOR, encoded)
}

fn meta_key(kind: &str) -> Result<String, ModelError> {
    Ok(format!(
        "{}{}{}",
        META_PREFIX,
        MAGIC_SEPARATOR,
        Key::partial(kind)?.urlsafe()
    ))
}

// =============================================================================
// ADAPTER
// =============================================================================

/// Indexed adapter over Redis-style primitives.
pub struct RedisAdapter<B: KeyValueBackend> {
    backend: B,
    config: AdapterConfig,
    registry: KindRegistry,
    counters: OperationCounters,
    write_lock: Mutex<()>,
}

impl<B: KeyValueBackend> fmt::Debug for RedisAdapter<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisAdapter")
            .field("backend", &self.backend.name())
            .field("mode", &self.config.redis_mode)
            .field("kinds", &self.registry.kinds())
            .finish_non_exhaustive()
    }
}

impl<B: KeyValueBackend> RedisAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, AdapterConfig::default())
    }

    pub fn with_config(backend: B, config: AdapterConfig) -> Self {
        Self {
            backend,
            config,
            registry: KindRegistry::default(),
            counters: OperationCounters::default(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Run `reindex` when the store was opened with `reconcile_on_open`.
    ///
    /// Call once every schema is bound; unbound kinds cannot be reindexed.
    pub fn reconcile_on_open(&self) -> Result<Option<usize>, ModelError> {
        if !self.config.reconcile_on_open {
            return Ok(None);
        }
        self.reindex().map(Some)
    }

    // -------------------------------------------------------------------------
    // Records
    // -------------------------------------------------------------------------

    fn slot(&self, key: &Key) -> Result<Slot, ModelError> {
        let encoded = self.key_string(key);
        Ok(match self.config.redis_mode {
            RedisMode::Toplevel => Slot::String(encoded),
            RedisMode::HashKind => Slot::Hash {
                key: Key::partial(key.kind())?.urlsafe(),
                field: encoded,
            },
            RedisMode::HashKey => Slot::Hash {
                key: self.key_string(key.root()),
                field: encoded,
            },
        })
    }

    fn read_slot(&self, slot: &Slot) -> Result<Option<Vec<u8>>, ModelError> {
        match slot {
            Slot::String(key) => self.backend.get(key),
            Slot::Hash { key, field } => self.backend.hash_get(key, field),
        }
    }

    fn serialize(data: &EntityData) -> Result<Vec<u8>, ModelError> {
        let object: serde_json::Map<String, serde_json::Value> = data
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        serde_json::to_vec(&object).map_err(|e| ModelError::SerializationError(e.to_string()))
    }

    /// Decode a record blob by the basetypes of its kind's schema.
    fn deserialize(&self, key: &Key, blob: &[u8]) -> Result<EntityData, ModelError> {
        let schema = self
            .registry
            .resolve(key.kind())
            .ok_or_else(|| ModelError::UnknownKind(key.kind().to_string()))?;
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(blob)
            .map_err(|e| ModelError::DeserializationError(e.to_string()))?;

        let mut data = EntityData::new();
        for (name, json) in &object {
            let Some(property) = schema.property(name) else {
                continue;
            };
            data.insert(name.clone(), Value::from_json(json, property.basetype())?);
        }
        Ok(data)
    }

    fn load(&self, key: &Key) -> Result<Option<EntityData>, ModelError> {
        match self.read_slot(&self.slot(key)?)? {
            Some(blob) => self.deserialize(key, &blob).map(Some),
            None => Ok(None),
        }
    }

    // -------------------------------------------------------------------------
    // Reverse index
    // -------------------------------------------------------------------------

    fn read_reverse(&self, encoded: &str) -> Result<Vec<IndexEntry>, ModelError> {
        match self.backend.get(&reverse_key(encoded))? {
            Some(raw) => postcard::from_bytes(&raw)
                .map_err(|e| ModelError::DeserializationError(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    fn write_reverse(encoded: &str, entries: &[IndexEntry]) -> Result<Command, ModelError> {
        let value = postcard::to_allocvec(entries)
            .map_err(|e| ModelError::SerializationError(e.to_string()))?;
        Ok(Command::Set {
            key: reverse_key(encoded),
            value,
        })
    }

    /// Pipeline replacing whatever is recorded for `bundle.encoded` with `bundle`.
    fn reindex_pipeline(&self, bundle: &IndexBundle) -> Result<Vec<Command>, ModelError> {
        let stale = self.read_reverse(&bundle.encoded)?;
        let entries = bundle.entries();
        tracing::trace!(
            key = %bundle.encoded,
            cleaned = stale.len(),
            written = entries.len(),
            "index pipeline"
        );
        let mut pipeline = Vec::with_capacity(stale.len() + entries.len() + 1);
        pipeline.extend(stale.iter().map(remove_index));
        pipeline.extend(entries.iter().map(add_index));
        pipeline.push(Self::write_reverse(&bundle.encoded, &entries)?);
        Ok(pipeline)
    }

    /// Encoded keys and slots of every stored record.
    fn stored_records(&self) -> Result<Vec<(String, Slot)>, ModelError> {
        let mut records = Vec::new();
        match self.config.redis_mode {
            RedisMode::Toplevel => {
                for key in self.backend.keys()? {
                    if !key.starts_with(INTERNAL_MARKER) {
                        records.push((key.clone(), Slot::String(key)));
                    }
                }
            }
            RedisMode::HashKind | RedisMode::HashKey => {
                for hash in self.backend.hashes()? {
                    if hash.starts_with(INTERNAL_MARKER) {
                        continue;
                    }
                    for field in self.backend.hash_fields(&hash)? {
                        let slot = Slot::Hash {
                            key: hash.clone(),
                            field: field.clone(),
                        };
                        records.push((field, slot));
                    }
                }
            }
        }
        Ok(records)
    }
}

impl<B: KeyValueBackend> ModelAdapter for RedisAdapter<B> {
    fn name(&self) -> &str {
        "redis"
    }

    fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    fn counters(&self) -> &OperationCounters {
        &self.counters
    }

    fn get(&self, key: &Key) -> Result<Option<EntityData>, ModelError> {
        tracing::debug!(adapter = "redis", key = %key, "get");
        self.load(key)
    }

    fn put(&self, key: &Key, data: &EntityData, schema: &Schema) -> Result<Key, ModelError> {
        let bundle = self.generate_indexes(key, schema, Some(data));
        let slot = self.slot(key)?;
        let blob = Self::serialize(data)?;
        tracing::debug!(adapter = "redis", key = %key, bytes = blob.len(), "put");

        let _guard = self.write_lock.lock();
        let mut pipeline = self.reindex_pipeline(&bundle)?;
        pipeline.push(slot.store(blob));
        self.backend.execute(&pipeline)?;
        Ok(key.clone())
    }

    fn delete(&self, key: &Key) -> Result<bool, ModelError> {
        let encoded = self.key_string(key);
        let slot = self.slot(key)?;
        tracing::debug!(adapter = "redis", key = %key, "delete");

        let _guard = self.write_lock.lock();
        let existed = self.read_slot(&slot)?.is_some();
        let stale = self.read_reverse(&encoded)?;
        if !existed && stale.is_empty() {
            return Ok(false);
        }
        if !existed {
            tracing::warn!(key = %key, entries = stale.len(), "cleaning indexes of a missing record");
        }

        let mut pipeline: Vec<Command> = stale.iter().map(remove_index).collect();
        pipeline.push(Command::Delete {
            key: reverse_key(&encoded),
        });
        pipeline.push(slot.remove());
        self.backend.execute(&pipeline)?;
        Ok(existed)
    }

    fn allocate_ids(&self, kind: &str, count: u64) -> Result<IdAllocation, ModelError> {
        let last = self.backend.hash_increment(&meta_key(kind)?, ID_FIELD, count)?;
        self.counters.record(Operation::Allocate);
        tracing::debug!(adapter = "redis", kind, count, last, "allocate");
        IdAllocation::ending_at(last, count)
    }

    fn entity_counts(&self) -> Result<BTreeMap<String, u64>, ModelError> {
        self.registry
            .kinds()
            .into_iter()
            .map(|kind| {
                let members = self
                    .backend
                    .members(&IndexName::Kind(kind.clone()).render())?;
                Ok((kind, members.len() as u64))
            })
            .collect()
    }

    fn as_indexed(&self) -> Option<&dyn IndexedModelAdapter> {
        Some(self)
    }
}

impl<B: KeyValueBackend> IndexedModelAdapter for RedisAdapter<B> {
    fn write_indexes(&self, bundle: &IndexBundle) -> Result<(), ModelError> {
        let _guard = self.write_lock.lock();
        let mut recorded: BTreeSet<IndexEntry> =
            self.read_reverse(&bundle.encoded)?.into_iter().collect();
        let entries = bundle.entries();
        let mut pipeline: Vec<Command> = entries.iter().map(add_index).collect();
        recorded.extend(entries);
        let recorded: Vec<IndexEntry> = recorded.into_iter().collect();
        pipeline.push(Self::write_reverse(&bundle.encoded, &recorded)?);
        self.backend.execute(&pipeline)
    }

    fn clean_indexes(&self, bundle: &IndexBundle) -> Result<(), ModelError> {
        let _guard = self.write_lock.lock();
        let stale = self.read_reverse(&bundle.encoded)?;
        let mut pipeline: Vec<Command> = stale.iter().map(remove_index).collect();
        pipeline.push(Command::Delete {
            key: reverse_key(&bundle.encoded),
        });
        self.backend.execute(&pipeline)
    }

    fn execute_query(
        &self,
        schema: &Arc<Schema>,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<QueryResult, ModelError> {
        tracing::debug!(adapter = "redis", kind = schema.kind(), "query");
        planner::execute(self, &self.registry, &self.config, schema, query, options)
    }

    fn reindex(&self) -> Result<usize, ModelError> {
        let _guard = self.write_lock.lock();
        let records = self.stored_records()?;
        let mut seen = BTreeSet::new();
        let mut count = 0;

        for (encoded, slot) in records {
            let key = match self.decode_key(&encoded) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(slot = ?slot, error = %e, "skipping undecodable record");
                    continue;
                }
            };
            seen.insert(encoded);
            let Some(schema) = self.registry.resolve(key.kind()) else {
                tracing::warn!(key = %key, "record of unregistered kind left unindexed");
                continue;
            };
            let Some(blob) = self.read_slot(&slot)? else {
                continue;
            };
            let data = self.deserialize(&key, &blob)?;
            let bundle = self.generate_indexes(&key, &schema, Some(&data));
            self.backend.execute(&self.reindex_pipeline(&bundle)?)?;
            count += 1;
        }

        let reverse_prefix = reverse_key("");
        for name in self.backend.keys()? {
            let Some(encoded) = name.strip_prefix(&reverse_prefix) else {
                continue;
            };
            if seen.contains(encoded) {
                continue;
            }
            tracing::warn!(key = %encoded, "reverse index without a record; cleaning");
            let stale = self.read_reverse(encoded)?;
            let mut pipeline: Vec<Command> = stale.iter().map(remove_index).collect();
            pipeline.push(Command::Delete { key: name.clone() });
            self.backend.execute(&pipeline)?;
        }

        tracing::info!(adapter = "redis", records = count, "reindex complete");
        Ok(count)
    }
}

impl<B: KeyValueBackend> IndexSource for RedisAdapter<B> {
    fn set_members(&self, name: &IndexName) -> Result<BTreeSet<String>, ModelError> {
        self.backend.members(&name.render())
    }

    fn range_members(
        &self,
        name: &IndexName,
        low: Bound<Score>,
        high: Bound<Score>,
    ) -> Result<BTreeSet<String>, ModelError> {
        self.backend.range_by_score(&name.render(), low, high)
    }

    fn fetch_records(&self, encoded: &[String]) -> Result<Vec<Option<EntityData>>, ModelError> {
        encoded
            .iter()
            .map(|encoded| self.load(&self.decode_key(encoded)?))
            .collect()
    }

    fn encode(&self, key: &Key) -> String {
        self.key_string(key)
    }

    fn decode(&self, encoded: &str) -> Result<Key, ModelError> {
        self.decode_key(encoded)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;
    use crate::schema::Property;
    use crate::storage::{MemoryBackend, RedbBackend};
    use crate::types::Basetype;
    use tempfile::TempDir;

    fn redis_adapter(mode: RedisMode) -> Arc<RedisAdapter<MemoryBackend>> {
        let config = AdapterConfig {
            redis_mode: mode,
            ..AdapterConfig::default()
        };
        Arc::new(RedisAdapter::with_config(MemoryBackend::new(), config))
    }

    fn person(adapter: Arc<dyn ModelAdapter>) -> Arc<Schema> {
        Schema::define("Person")
            .property(Property::new("name", Basetype::String).required())
            .property(Property::new("age", Basetype::Int))
            .bind(adapter)
            .expect("bind")
    }

    #[test]
    fn every_mode_round_trips() {
        for mode in [RedisMode::Toplevel, RedisMode::HashKind, RedisMode::HashKey] {
            let adapter = redis_adapter(mode);
            let schema = person(adapter.clone());
            let mut model = schema.create().expect("create");
            model.set("name", "Grace").expect("set");
            model.set("age", 85).expect("set");
            let key = model.put().expect("put");

            let fetched = schema.get(&key).expect("get").expect("found");
            assert_eq!(fetched.get_raw("age").expect("age"), Some(&Value::Int(85)));
            assert!(schema.delete(&key).expect("delete"));
            assert!(schema.get(&key).expect("get").is_none(), "{:?}", mode);
        }
    }

    #[test]
    fn layout_matches_mode() {
        let adapter = redis_adapter(RedisMode::HashKind);
        let schema = person(adapter.clone());
        let mut model = schema.create().expect("create");
        model.set("name", "Grace").expect("set");
        let key = model.put().expect("put");

        let kind_hash = Key::partial("Person").expect("partial").urlsafe();
        let fields = adapter.backend().hash_fields(&kind_hash).expect("fields");
        assert_eq!(fields, vec![key.urlsafe()]);
        let counter = adapter
            .backend()
            .hash_get(&meta_key("Person").expect("meta"), ID_FIELD)
            .expect("hget");
        assert_eq!(counter, Some(b"1".to_vec()));
    }

    #[test]
    fn reput_replaces_indexes() {
        let adapter = redis_adapter(RedisMode::Toplevel);
        let schema = person(adapter.clone());
        let mut model = schema.create().expect("create");
        model.set("name", "Grace").expect("set");
        model.set("age", 85).expect("set");
        model.put().expect("put");
        model.set("name", "Ada").expect("set");
        model.put().expect("reput");

        let old = schema.query().filter(Filter::eq("name", "Grace")).fetch().expect("query");
        assert!(old.is_empty());
        let new = schema.query().filter(Filter::eq("name", "Ada")).fetch().expect("query");
        assert_eq!(new.len(), 1);
    }

    #[test]
    fn reindex_repairs_and_drops_orphans() {
        let adapter = redis_adapter(RedisMode::Toplevel);
        let schema = person(adapter.clone());
        let mut model = schema.create().expect("create");
        model.set("name", "Grace").expect("set");
        let key = model.put().expect("put");

        // Lose the kind index entry, and leave an orphaned reverse record behind.
        let kind_bucket = IndexName::Kind("Person".into()).render();
        let ghost = Key::new("Person", 99u64).expect("key").urlsafe();
        let orphan = IndexEntry {
            name: IndexName::Kind("Person".into()),
            member: ghost.clone(),
            score: None,
        };
        adapter
            .backend()
            .execute(&[
                Command::SetRemove {
                    key: kind_bucket.clone(),
                    member: key.urlsafe(),
                },
                add_index(&orphan),
                RedisAdapter::<MemoryBackend>::write_reverse(&ghost, &[orphan.clone()])
                    .expect("reverse"),
            ])
            .expect("exec");

        assert_eq!(adapter.reindex().expect("reindex"), 1);
        let members = adapter.backend().members(&kind_bucket).expect("members");
        assert_eq!(members.into_iter().collect::<Vec<_>>(), vec![key.urlsafe()]);
        assert_eq!(adapter.backend().get(&reverse_key(&ghost)).expect("get"), None);
    }

    #[test]
    fn redb_store_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("canteen.redb");
        let key = {
            let adapter = Arc::new(RedisAdapter::new(RedbBackend::open(&path).expect("open")));
            let schema = person(adapter.clone());
            let mut model = schema.create().expect("create");
            model.set("name", "Grace").expect("set");
            model.set("age", 85).expect("set");
            model.put().expect("put")
        };

        let adapter = Arc::new(RedisAdapter::new(RedbBackend::open(&path).expect("reopen")));
        let schema = person(adapter.clone());
        let found = schema
            .query()
            .filter(Filter::ge("age", 80))
            .fetch()
            .expect("query");
        assert_eq!(found.keys(), vec![key]);
        let next = adapter.allocate_ids("Person", 1).expect("alloc");
        assert_eq!(next.first(), 2);
    }
}
