//! # Query Benchmarks
//!
//! Performance benchmarks for canteen-model puts and index-backed queries.
//!
//! Run with: `cargo bench -p canteen-model`

use canteen_model::{
    Basetype, Filter, InMemoryAdapter, MemoryBackend, ModelAdapter, Property, RedisAdapter,
    Schema, Sort,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;

const COLORS: [&str; 4] = ["red", "green", "blue", "black"];

fn bind(adapter: Arc<dyn ModelAdapter>) -> Arc<Schema> {
    Schema::define("Reading")
        .property(Property::new("color", Basetype::String))
        .property(Property::new("value", Basetype::Int))
        .bind(adapter)
        .expect("bind")
}

/// Bind a schema and store `size` readings with cycling colours.
fn populate(adapter: Arc<dyn ModelAdapter>, size: usize) -> Arc<Schema> {
    let schema = bind(adapter);
    for i in 0..size {
        let mut model = schema.create().expect("create");
        model.set("color", COLORS[i % COLORS.len()]).expect("set");
        model.set("value", i as i64).expect("set");
        model.put().expect("put");
    }
    schema
}

fn adapters() -> [(&'static str, Arc<dyn ModelAdapter>); 2] {
    [
        ("inmemory", Arc::new(InMemoryAdapter::new())),
        ("redis", Arc::new(RedisAdapter::new(MemoryBackend::new()))),
    ]
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");

    for (name, adapter) in adapters() {
        let schema = bind(adapter);
        let mut i = 0i64;
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                let mut model = schema.create().expect("create");
                model.set("color", "red").expect("set");
                model.set("value", i).expect("set");
                i += 1;
                black_box(model.put().expect("put"))
            });
        });
    }

    group.finish();
}

fn bench_equality_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("equality_query");

    for size in [100, 1000].iter() {
        for (name, adapter) in adapters() {
            let schema = populate(adapter, *size);
            let query = schema.query().filter(Filter::eq("color", "green")).keys_only(true);

            group.bench_with_input(BenchmarkId::new(name, size), size, |b, _| {
                b.iter(|| black_box(query.fetch().expect("fetch")));
            });
        }
    }

    group.finish();
}

fn bench_range_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_query");

    for size in [100, 1000].iter() {
        for (name, adapter) in adapters() {
            let schema = populate(adapter, *size);
            let query = schema
                .query()
                .filter(Filter::ge("value", (*size / 4) as i64))
                .filter(Filter::lt("value", (*size / 2) as i64))
                .keys_only(true);

            group.bench_with_input(BenchmarkId::new(name, size), size, |b, _| {
                b.iter(|| black_box(query.fetch().expect("fetch")));
            });
        }
    }

    group.finish();
}

fn bench_sorted_page(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_page");

    for size in [100, 1000].iter() {
        for (name, adapter) in adapters() {
            let schema = populate(adapter, *size);
            let query = schema
                .query()
                .filter(Filter::eq("color", "blue"))
                .sort(Sort::desc("value"))
                .limit(10);

            group.bench_with_input(BenchmarkId::new(name, size), size, |b, _| {
                b.iter(|| black_box(query.fetch().expect("fetch")));
            });
        }
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_put,
    bench_equality_query,
    bench_range_query,
    bench_sorted_page,
);

criterion_main!(benches);
