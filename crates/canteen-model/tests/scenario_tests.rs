//! # Scenario Tests
//!
//! End-to-end behaviour of schemas, models, queries and graph indexes,
//! run against every indexed adapter.

use canteen_model::{
    AdapterConfig, Basetype, EdgeFilter, Filter, InMemoryAdapter, Key, KeyFilter, MemoryBackend,
    ModelAdapter, ModelError, Property, RedbBackend, RedisAdapter, RedisMode, Schema, Sort, Value,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

// =============================================================================
// FIXTURES
// =============================================================================

/// Run `scenario` against a fresh instance of every adapter.
fn for_each_adapter(scenario: impl Fn(Arc<dyn ModelAdapter>)) {
    scenario(Arc::new(InMemoryAdapter::new()));
    for mode in [RedisMode::Toplevel, RedisMode::HashKind, RedisMode::HashKey] {
        let config = AdapterConfig {
            redis_mode: mode,
            ..AdapterConfig::default()
        };
        scenario(Arc::new(RedisAdapter::with_config(MemoryBackend::new(), config)));
    }
    let dir = TempDir::new().expect("tempdir");
    let backend = RedbBackend::open(dir.path().join("scenario.redb")).expect("open");
    scenario(Arc::new(RedisAdapter::new(backend)));
}

fn sample(adapter: Arc<dyn ModelAdapter>) -> Arc<Schema> {
    Schema::define("Sample")
        .property(Property::new("string", Basetype::String).required())
        .property(Property::new("integer", Basetype::Int))
        .property(Property::new("tags", Basetype::String).repeated())
        .property(Property::new("color", Basetype::String).default_value("blue"))
        .bind(adapter)
        .expect("bind")
}

fn put(schema: &Arc<Schema>, string: &str, integer: i64) -> Key {
    let mut model = schema.create().expect("create");
    model.set("string", string).expect("set");
    model.set("integer", integer).expect("set");
    model.put().expect("put")
}

fn integers(models: Vec<canteen_model::Model>) -> Vec<i64> {
    models
        .iter()
        .filter_map(|m| m.get_raw("integer").ok().flatten().and_then(Value::as_int))
        .collect()
}

// =============================================================================
// KEYS
// =============================================================================

#[test]
fn key_ancestry_runs_root_first() {
    let parent = Key::new("Org", "acme").expect("key");
    let child = parent.child("User", "bob").expect("child");
    assert_eq!(child.ancestry(), vec![parent.clone(), child.clone()]);
    assert_eq!(child.depth(), 2);
    assert_eq!(child.joined(), ":Org:acme:User:bob");
}

#[test]
fn persisted_keys_are_immutable() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        let mut key = put(&schema, "x", 1);
        assert!(matches!(key.set_id(7u64), Err(ModelError::PersistedKey(_))));

        let mut fresh = Key::partial("Sample").expect("partial");
        fresh.set_id(3u64).expect("first write");
        assert!(matches!(fresh.set_id(4u64), Err(ModelError::KeyAlreadySet(_))));
    });
}

// =============================================================================
// MODELS
// =============================================================================

#[test]
fn put_get_round_trip() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        let key = put(&schema, "x", 4);
        let model = schema.get(&key).expect("get").expect("found");
        assert_eq!(model.get_raw("string").expect("get"), Some(&Value::from("x")));
        assert!(model.key().is_persisted());
        assert!(!model.has_changes());
    });
}

#[test]
fn required_property_blocks_put_until_set() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        let mut model = schema.create().expect("create");
        let err = model.put().expect_err("missing required");
        assert!(matches!(err, ModelError::PropertyRequired { .. }));
        assert!(err.is_validation());

        model.set("string", "now set").expect("set");
        assert!(model.put().is_ok());
    });
}

#[test]
fn repeated_properties_need_lists() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        let mut model = schema.create().expect("create");
        model.set("string", "x").expect("set");

        model.set("tags", "solo").expect("set");
        assert!(matches!(model.put(), Err(ModelError::PropertyRepeated { .. })));
        model.set("tags", vec!["a", "b"]).expect("set");
        assert!(model.put().is_ok());

        model.set("string", vec!["not", "scalar"]).expect("set");
        assert!(matches!(model.put(), Err(ModelError::PropertyNotRepeated { .. })));
    });
}

#[test]
fn explicit_reads_skip_defaults() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        let model = schema.create().expect("create");
        assert_eq!(model.get_raw("color").expect("raw"), None);
        assert_eq!(model.get_with_default("color").expect("implicit"), Value::from("blue"));
    });
}

#[test]
fn bulk_get_preserves_order() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        let a = put(&schema, "a", 1);
        let b = put(&schema, "b", 2);
        let missing = Key::new("Sample", 999u64).expect("key");

        let found = schema
            .get_multi(&[b.clone(), missing, a.clone()])
            .expect("get_multi");
        let keys: Vec<Option<Key>> = found
            .into_iter()
            .map(|m| m.map(|m| m.key().clone()))
            .collect();
        assert_eq!(keys, vec![Some(b), None, Some(a)]);
    });
}

// =============================================================================
// QUERIES
// =============================================================================

#[test]
fn delete_removes_indexes() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        let mut model = schema.create().expect("create");
        model.set("string", "x").expect("set");
        let key = model.put().expect("put");
        assert!(model.delete().expect("delete"));

        let found = schema
            .query()
            .filter(Filter::eq("string", "x"))
            .fetch()
            .expect("query");
        assert!(!found.keys().contains(&key));
    });
}

#[test]
fn sort_direction() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        for n in [1, 5, 3] {
            put(&schema, "s", n);
        }
        let ascending = schema
            .query()
            .sort(Sort::asc("integer"))
            .fetch()
            .expect("query");
        assert_eq!(integers(ascending.into_models()), vec![1, 3, 5]);
        let descending = schema
            .query()
            .sort(Sort::desc("integer"))
            .fetch()
            .expect("query");
        assert_eq!(integers(descending.into_models()), vec![5, 3, 1]);
    });
}

#[test]
fn multiple_sorts_break_ties() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        for (s, n) in [("b", 2), ("a", 2), ("c", 1)] {
            put(&schema, s, n);
        }
        let models = schema
            .query()
            .sort(Sort::desc("integer"))
            .sort(Sort::asc("string"))
            .fetch()
            .expect("query")
            .into_models();
        let order: Vec<Value> = models
            .iter()
            .map(|m| m.get_with_default("string").expect("string"))
            .collect();
        assert_eq!(order, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    });
}

#[test]
fn equality_filters_intersect() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        let both = put(&schema, "x", 1);
        put(&schema, "x", 2);
        put(&schema, "y", 1);

        let found = schema
            .query()
            .filter(Filter::eq("string", "x"))
            .filter(Filter::eq("integer", 1))
            .fetch()
            .expect("query");
        assert_eq!(found.keys(), vec![both]);
    });
}

#[test]
fn range_filters_merge_and_honour_bounds() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        for n in [-1, 0, 1, 2, 3, 4] {
            put(&schema, "r", n);
        }
        let mut found = integers(
            schema
                .query()
                .filter(Filter::gt("integer", 0))
                .filter(Filter::le("integer", 3))
                .fetch()
                .expect("query")
                .into_models(),
        );
        found.sort_unstable();
        assert_eq!(found, vec![1, 2, 3]);

        let empty = schema
            .query()
            .filter(Filter::gt("integer", 3))
            .filter(Filter::lt("integer", 1))
            .fetch()
            .expect("query");
        assert!(empty.is_empty());
    });
}

#[test]
fn large_integers_match_exactly() {
    const EDGE: i64 = 1 << 53;
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        let low = put(&schema, "big", EDGE);
        let high = put(&schema, "big", EDGE + 1);

        let found = schema
            .query()
            .filter(Filter::eq("integer", EDGE + 1))
            .fetch()
            .expect("query");
        assert_eq!(found.keys(), vec![high.clone()]);

        let below = schema
            .query()
            .filter(Filter::lt("integer", EDGE + 1))
            .fetch()
            .expect("query");
        assert_eq!(below.keys(), vec![low.clone()]);

        let above = schema
            .query()
            .filter(Filter::gt("integer", EDGE))
            .filter(Filter::eq("string", "big"))
            .fetch()
            .expect("query");
        assert_eq!(above.keys(), vec![high]);

        let either = schema
            .query()
            .filter(Filter::eq("integer", EDGE).or(Filter::eq("integer", 7)))
            .fetch()
            .expect("query");
        assert_eq!(either.keys(), vec![low]);
    });
}

#[test]
fn deferred_filters_and_or_chains() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        put(&schema, "apple", 1);
        put(&schema, "banana", 2);
        put(&schema, "cherry", 3);

        let not_two = schema
            .query()
            .filter(Filter::ne("integer", 2))
            .fetch()
            .expect("query");
        assert_eq!(not_two.len(), 2);

        let substring = schema
            .query()
            .filter(Filter::contains("string", "an"))
            .fetch()
            .expect("query");
        assert_eq!(substring.len(), 1);

        let either = schema
            .query()
            .filter(Filter::eq("string", "apple").or(Filter::eq("string", "cherry")))
            .sort(Sort::asc("integer"))
            .fetch()
            .expect("query");
        assert_eq!(integers(either.into_models()), vec![1, 3]);
    });
}

#[test]
fn repeated_equality_matches_membership() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        let mut model = schema.create().expect("create");
        model.set("string", "tagged").expect("set");
        model.set("tags", vec!["red", "green"]).expect("set");
        let key = model.put().expect("put");

        let found = schema
            .query()
            .filter(Filter::eq("tags", "green"))
            .fetch()
            .expect("query");
        assert_eq!(found.keys(), vec![key]);
    });
}

#[test]
fn offset_then_limit() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        for n in 1..=6 {
            put(&schema, "p", n);
        }
        let page = schema
            .query()
            .sort(Sort::asc("integer"))
            .offset(2)
            .limit(3)
            .fetch()
            .expect("query");
        assert_eq!(integers(page.into_models()), vec![3, 4, 5]);

        let first = schema
            .query()
            .sort(Sort::desc("integer"))
            .get()
            .expect("get")
            .expect("found");
        assert_eq!(first.get_raw("integer").expect("integer"), Some(&Value::Int(6)));
    });
}

#[test]
fn keys_only_and_ancestor_scope() {
    for_each_adapter(|adapter| {
        let org = Schema::define("Org").bind(Arc::clone(&adapter)).expect("bind");
        let user = Schema::define("User")
            .property(Property::new("name", Basetype::String))
            .bind(adapter)
            .expect("bind");

        let mut acme = org.create().expect("create");
        let acme_key = acme.put().expect("put");
        let mut other = org.create().expect("create");
        let other_key = other.put().expect("put");

        for (parent, name) in [(&acme_key, "bob"), (&acme_key, "eve"), (&other_key, "mal")] {
            let mut member = user.create().expect("create");
            member.set_parent(parent.clone()).expect("parent");
            member.set("name", name).expect("set");
            member.put().expect("put");
        }

        let scoped = user
            .query()
            .ancestor(acme_key.clone())
            .keys_only(true)
            .fetch()
            .expect("query");
        let keys = scoped.keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.has_ancestor(&acme_key)));

        let via_filter = user
            .query()
            .filter(KeyFilter::ancestor(other_key.clone()))
            .fetch()
            .expect("query");
        assert_eq!(via_filter.len(), 1);
    });
}

#[test]
fn unsupported_query_shapes() {
    let adapter = Arc::new(InMemoryAdapter::new());
    let schema = sample(adapter);
    let projected = canteen_model::QueryOptions {
        projection: Some(vec!["string".into()]),
        ..Default::default()
    };
    assert!(matches!(
        schema.query().fetch_with(&projected),
        Err(ModelError::Unsupported(_))
    ));
    assert!(matches!(
        canteen_model::Query::kindless().fetch(),
        Err(ModelError::Unsupported(_))
    ));
    assert!(matches!(
        schema.query().hint("index"),
        Err(ModelError::Unsupported(_))
    ));
}

// =============================================================================
// GRAPH
// =============================================================================

#[test]
fn directed_edges_and_neighbors() {
    for_each_adapter(|adapter| {
        let person = Schema::vertex("Person")
            .property(Property::new("name", Basetype::String))
            .bind(adapter)
            .expect("bind");
        let follows = person.spawn_edge("Follows", &[&person], true).expect("edge");

        let mut keys = Vec::new();
        for name in ["ann", "ben", "cat"] {
            let mut p = person.create().expect("create");
            p.set("name", name).expect("set");
            keys.push(p.put().expect("put"));
        }
        let (ann, ben, cat) = (&keys[0], &keys[1], &keys[2]);

        follows
            .connect(ann, std::slice::from_ref(ben))
            .expect("connect")
            .put()
            .expect("put");
        follows
            .connect(cat, std::slice::from_ref(ann))
            .expect("connect")
            .put()
            .expect("put");

        let outbound = follows
            .query()
            .filter(EdgeFilter::edges(ann.clone(), Some(true)))
            .fetch()
            .expect("query");
        assert_eq!(outbound.len(), 1);

        let neighbors: BTreeSet<Key> = person
            .query()
            .filter(EdgeFilter::neighbors(ann.clone(), None))
            .fetch()
            .expect("query")
            .keys()
            .into_iter()
            .collect();
        assert_eq!(neighbors, [ben.clone(), cat.clone()].into_iter().collect());

        let followed: Vec<Key> = person
            .query()
            .filter(EdgeFilter::neighbors(ann.clone(), Some(true)))
            .fetch()
            .expect("query")
            .keys();
        assert_eq!(followed, vec![ben.clone()]);
    });
}

#[test]
fn key_properties_match_across_role_changes() {
    for_each_adapter(|adapter| {
        let post = Schema::define("Post")
            .property(Property::new("author", Basetype::Key))
            .bind(adapter.clone())
            .expect("bind");
        let ada = Key::new("Person", "ada").expect("key");
        let write = |author: &Key| {
            let mut model = post.create().expect("create");
            model.set("author", author.clone()).expect("set");
            model.put().expect("put")
        };

        let early = write(&ada);
        let _person = Schema::vertex("Person").bind(adapter).expect("bind");
        let late = write(&ada);

        let found: BTreeSet<Key> = post
            .query()
            .filter(Filter::eq("author", ada.clone()))
            .fetch()
            .expect("query")
            .keys()
            .into_iter()
            .collect();
        assert_eq!(found, [early, late].into_iter().collect());
    });
}

#[test]
fn undirected_edges_need_two_peers() {
    for_each_adapter(|adapter| {
        let city = Schema::vertex("City").bind(adapter).expect("bind");
        let road = city.spawn_edge("Road", &[&city], false).expect("edge");
        let a = city.create().expect("create").put().expect("put");
        let b = city.create().expect("create").put().expect("put");

        let mut lonely = road.create().expect("create");
        lonely.set("peers", vec![a.clone()]).expect("set");
        assert!(matches!(lonely.put(), Err(ModelError::InvalidEdge(_))));

        let edge = road.connect(&a, std::slice::from_ref(&b)).expect("connect").put().expect("put");
        let touching = road
            .query()
            .filter(EdgeFilter::edges(b.clone(), None))
            .fetch()
            .expect("query");
        assert_eq!(touching.keys(), vec![edge.clone()]);

        road.delete(&edge).expect("delete");
        let gone = city
            .query()
            .filter(EdgeFilter::neighbors(a.clone(), None))
            .fetch()
            .expect("query");
        assert!(gone.is_empty());
    });
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[test]
fn concurrent_allocation_is_unique() {
    for_each_adapter(|adapter| {
        let per_thread = 25;
        let threads = 8;
        let ids: Vec<u64> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let adapter = Arc::clone(&adapter);
                    scope.spawn(move || {
                        (0..per_thread)
                            .map(|_| adapter.allocate_ids("Ticket", 1).expect("alloc").first())
                            .collect::<Vec<u64>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().expect("join"))
                .collect()
        });
        let unique: BTreeSet<u64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());

        let block = adapter.allocate_ids("Ticket", 10).expect("alloc");
        let block: Vec<u64> = block.into_iter().collect();
        assert_eq!(block.len(), 10);
        assert!(block.windows(2).all(|w| w[1] == w[0] + 1));
    });
}

#[test]
fn concurrent_puts_keep_indexes_consistent() {
    for_each_adapter(|adapter| {
        let schema = sample(adapter);
        std::thread::scope(|scope| {
            for t in 0..4 {
                let schema = Arc::clone(&schema);
                scope.spawn(move || {
                    for n in 0..10 {
                        put(&schema, "c", t * 10 + n);
                    }
                });
            }
        });
        let all = schema
            .query()
            .filter(Filter::eq("string", "c"))
            .fetch()
            .expect("query");
        assert_eq!(all.len(), 40);
        let meta = schema.adapter().metadata().expect("metadata");
        assert_eq!(meta.kinds.get("Sample"), Some(&40));
    });
}
