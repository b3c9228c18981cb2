//! # Property-Based Tests
//!
//! Invariants of key encoding, index maintenance and id allocation, checked
//! with proptest.

use canteen_model::adapter::index::IndexEntry;
use canteen_model::{
    Basetype, EntityData, IdAllocation, InMemoryAdapter, IndexedModelAdapter, Key, KeyId,
    KeyValueBackend, MemoryBackend, ModelAdapter, Property, RedisAdapter, Schema, Value,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

// =============================================================================
// STRATEGIES
// =============================================================================

fn kind() -> impl Strategy<Value = String> {
    "[A-Z][a-zA-Z]{0,8}"
}

fn key_id() -> impl Strategy<Value = KeyId> {
    prop_oneof![
        (1u64..u64::MAX).prop_map(KeyId::Int),
        "[a-z][a-z0-9_]{0,10}".prop_map(KeyId::Name),
    ]
}

fn key() -> impl Strategy<Value = Key> {
    vec((kind(), key_id()), 1..4).prop_map(|path| {
        let mut segments = Vec::new();
        segments.push(String::new());
        for (kind, id) in path {
            segments.push(kind);
            segments.push(id.to_string());
        }
        Key::from_raw(&segments).expect("generated key")
    })
}

fn record() -> impl Strategy<Value = (String, i64, Vec<String>)> {
    (
        "[a-z ]{0,12}",
        any::<i64>(),
        vec("[a-z]{1,6}", 0..4),
    )
}

fn data_for((name, score, tags): (String, i64, Vec<String>)) -> EntityData {
    let mut data = EntityData::new();
    data.insert("name".into(), Value::from(name));
    data.insert("score".into(), Value::from(score));
    data.insert("tags".into(), Value::from(tags));
    data
}

fn bind(adapter: Arc<dyn ModelAdapter>) -> Arc<Schema> {
    Schema::define("Item")
        .property(Property::new("name", Basetype::String))
        .property(Property::new("score", Basetype::Int))
        .property(Property::new("tags", Basetype::String).repeated())
        .bind(adapter)
        .expect("bind")
}

/// Whether `entry` is present in a Redis-style backend.
fn present(backend: &MemoryBackend, entry: &IndexEntry) -> bool {
    let bucket = entry.name.render();
    match entry.score {
        Some(score) => backend
            .range_by_score(&bucket, Bound::Included(score), Bound::Included(score))
            .expect("range")
            .contains(&entry.member),
        None => backend
            .members(&bucket)
            .expect("members")
            .contains(&entry.member),
    }
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Flattened and URL-safe forms both decode to an equal key.
    #[test]
    fn key_round_trip(key in key()) {
        prop_assert_eq!(Key::from_raw(&key.flatten()).expect("raw"), key.clone());
        prop_assert_eq!(Key::from_urlsafe(&key.urlsafe()).expect("urlsafe"), key.clone());
        prop_assert_eq!(Key::from_joined(&key.joined()).expect("joined"), key.clone());
    }

    /// Ancestry runs root-first and ends at the key itself.
    #[test]
    fn ancestry_is_root_first(key in key()) {
        let ancestry = key.ancestry();
        prop_assert_eq!(ancestry.len(), key.depth());
        prop_assert_eq!(ancestry.first(), Some(key.root()));
        prop_assert_eq!(ancestry.last(), Some(&key));
    }

    /// Writing then cleaning one key restores the in-memory index store.
    #[test]
    fn inmemory_write_clean_is_identity(id in 1u64..1000, fields in record()) {
        let adapter = Arc::new(InMemoryAdapter::new());
        let schema = bind(adapter.clone());
        let before = adapter.index_snapshot();

        let key = Key::new("Item", id).expect("key");
        let data = data_for(fields);
        adapter
            .write_indexes(&adapter.generate_indexes(&key, &schema, Some(&data)))
            .expect("write");
        prop_assert!(!adapter.index_snapshot().is_empty());
        adapter
            .clean_indexes(&adapter.generate_indexes(&key, &schema, None))
            .expect("clean");

        prop_assert_eq!(adapter.index_snapshot(), before);
    }

    /// Writing then cleaning one key leaves no entry and no reverse record behind.
    #[test]
    fn redis_write_clean_is_identity(id in 1u64..1000, fields in record()) {
        let adapter = Arc::new(RedisAdapter::new(MemoryBackend::new()));
        let schema = bind(adapter.clone());

        let key = Key::new("Item", id).expect("key");
        let data = data_for(fields);
        let bundle = adapter.generate_indexes(&key, &schema, Some(&data));
        adapter.write_indexes(&bundle).expect("write");
        for entry in bundle.entries() {
            prop_assert!(present(adapter.backend(), &entry));
        }
        adapter
            .clean_indexes(&adapter.generate_indexes(&key, &schema, None))
            .expect("clean");

        for entry in bundle.entries() {
            prop_assert!(!present(adapter.backend(), &entry));
        }
        prop_assert!(adapter.backend().keys().expect("keys").is_empty());
    }

    /// Blocks are contiguous, sized as requested, and never overlap.
    #[test]
    fn allocation_ranges_are_contiguous(counts in vec(1u64..50, 1..8)) {
        let adapter = InMemoryAdapter::new();
        let mut seen = BTreeSet::new();
        let mut next = 1;
        for count in counts {
            let block = adapter.allocate_ids("Item", count).expect("allocate");
            prop_assert_eq!(block.len(), count);
            prop_assert_eq!(block.first(), next);
            if count == 1 {
                prop_assert!(matches!(block, IdAllocation::Single(_)));
            }
            for id in block {
                prop_assert!(seen.insert(id));
            }
            next += count;
        }
    }
}
