//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use canteen::expr::{FilterExpr, parse_sort};
use canteen::{CanteenConfig, Store};
use canteen_model::{DictOptions, Key, Model, ModelError, QueryResult};

/// Print a JSON document, pretty when possible.
fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

fn model_json(model: &Model) -> serde_json::Value {
    serde_json::json!({
        "key": model.key().urlsafe(),
        "kind": model.kind(),
        "data": model.to_dict(&DictOptions::default()),
    })
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show adapter counters and entity counts.
pub fn cmd_status(store: &Store, config: &CanteenConfig, json_mode: bool) -> Result<(), ModelError> {
    let metadata = store.adapter().metadata()?;

    if json_mode {
        let output = serde_json::json!({
            "store": config.store.path.to_string_lossy(),
            "kinds": store.kinds().collect::<Vec<_>>(),
            "reconciled": store.reconciled(),
            "metadata": serde_json::to_value(&metadata)
                .map_err(|e| ModelError::SerializationError(e.to_string()))?,
        });
        print_json(&output);
        return Ok(());
    }

    println!("Canteen Store Status");
    println!("====================");
    println!("Store:    {:?}", config.store.path);
    println!("Adapter:  {}", metadata.adapter);
    if let Some(count) = store.reconciled() {
        println!("Reindexed on open: {}", count);
    }
    println!();
    println!("Entities: {}", metadata.entities);
    for kind in store.kinds() {
        let count = metadata.kinds.get(kind).copied().unwrap_or(0);
        println!("  {:<20} {}", kind, count);
    }

    Ok(())
}

// =============================================================================
// ENTITY COMMANDS
// =============================================================================

/// Store an entity built from JSON.
pub fn cmd_put(
    store: &Store,
    json_mode: bool,
    kind: &str,
    data: &str,
    key: Option<&str>,
    parent: Option<&str>,
) -> Result<(), ModelError> {
    let schema = store.schema(kind)?;
    let mut model = schema.from_json(data)?;
    if let Some(encoded) = key {
        model.set_key(Key::from_urlsafe(encoded)?)?;
    }
    if let Some(encoded) = parent {
        model.set_parent(Key::from_urlsafe(encoded)?)?;
    }

    let key = model.put()?;
    tracing::info!(kind = kind, key = %key, "entity stored");

    if json_mode {
        print_json(&model_json(&model));
    } else {
        println!("{}", key.urlsafe());
    }
    Ok(())
}

/// Fetch one entity.
pub fn cmd_get(store: &Store, json_mode: bool, encoded: &str) -> Result<(), ModelError> {
    let key = Key::from_urlsafe(encoded)?;
    let schema = store.schema_for(&key)?;

    match schema.get(&key)? {
        Some(model) if json_mode => print_json(&model_json(&model)),
        Some(model) => println!("{}", model.to_json()?),
        None if json_mode => print_json(&serde_json::Value::Null),
        None => println!("Not found: {}", key),
    }
    Ok(())
}

/// Delete one entity.
pub fn cmd_delete(store: &Store, json_mode: bool, encoded: &str) -> Result<(), ModelError> {
    let key = Key::from_urlsafe(encoded)?;
    let schema = store.schema_for(&key)?;
    let deleted = schema.delete(&key)?;
    tracing::info!(key = %key, deleted, "delete");

    if json_mode {
        print_json(&serde_json::json!({ "key": encoded, "deleted": deleted }));
    } else if deleted {
        println!("Deleted {}", key);
    } else {
        println!("Not found: {}", key);
    }
    Ok(())
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Arguments of the `query` command.
#[derive(Debug, Clone)]
pub struct QueryArgs {
    pub kind: String,
    pub filters: Vec<String>,
    pub sorts: Vec<String>,
    pub limit: Option<i64>,
    pub offset: Option<u64>,
    pub keys_only: bool,
    pub ancestor: Option<String>,
}

/// Run a query on one kind.
pub fn cmd_query(store: &Store, json_mode: bool, args: &QueryArgs) -> Result<(), ModelError> {
    let schema = store.schema(&args.kind)?;

    let mut query = schema.query().keys_only(args.keys_only);
    for expr in &args.filters {
        query = query.filter(FilterExpr::parse(expr)?.resolve(schema)?);
    }
    for expr in &args.sorts {
        query = query.sort(parse_sort(expr)?);
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }
    if let Some(offset) = args.offset {
        query = query.offset(offset);
    }
    if let Some(encoded) = &args.ancestor {
        query = query.ancestor(Key::from_urlsafe(encoded)?);
    }

    tracing::debug!(query = %query, "running query");
    let result = query.fetch()?;

    match result {
        QueryResult::Keys(keys) => {
            if json_mode {
                let keys: Vec<String> = keys.iter().map(Key::urlsafe).collect();
                print_json(&serde_json::json!(keys));
            } else {
                for key in keys {
                    println!("{}\t{}", key.urlsafe(), key);
                }
            }
        }
        QueryResult::Models(models) => {
            if json_mode {
                let models: Vec<serde_json::Value> = models.iter().map(model_json).collect();
                print_json(&serde_json::Value::Array(models));
            } else {
                for model in &models {
                    println!("{}\t{}", model.key().urlsafe(), model.to_json()?);
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// MAINTENANCE COMMANDS
// =============================================================================

/// Reserve ids for a kind.
pub fn cmd_allocate(store: &Store, json_mode: bool, kind: &str, count: u64) -> Result<(), ModelError> {
    let schema = store.schema(kind)?;
    let ids = schema.adapter().allocate_ids(schema.kind(), count)?;

    if json_mode {
        print_json(&serde_json::json!({
            "kind": kind,
            "first": ids.first(),
            "count": ids.len(),
        }));
    } else {
        let first = ids.first();
        let ids: Vec<u64> = ids.into_iter().collect();
        match ids.last() {
            Some(last) if *last != first => println!("{}..={}", first, last),
            _ => println!("{}", first),
        }
    }
    Ok(())
}

/// Rebuild every index.
pub fn cmd_reindex(store: &Store, json_mode: bool) -> Result<(), ModelError> {
    let adapter = store.adapter();
    let indexed = adapter.as_indexed().ok_or_else(|| {
        ModelError::Unsupported(format!("adapter \"{}\" keeps no indexes", adapter.name()))
    })?;
    let count = indexed.reindex()?;
    tracing::info!(records = count, "reindex complete");

    if json_mode {
        print_json(&serde_json::json!({ "reindexed": count }));
    } else {
        println!("Reindexed {} records", count);
    }
    Ok(())
}

// =============================================================================
// KEY COMMANDS
// =============================================================================

/// Encode `Kind:id[:Kind:id...]`.
pub fn cmd_key_encode(path: &str, json_mode: bool) -> Result<(), ModelError> {
    let key = Key::from_joined(&format!(":{}", path.trim_start_matches(':')))?;

    if json_mode {
        print_json(&serde_json::json!({ "joined": key.joined(), "urlsafe": key.urlsafe() }));
    } else {
        println!("{}", key.urlsafe());
    }
    Ok(())
}

/// Decode a URL-safe key.
pub fn cmd_key_decode(encoded: &str, json_mode: bool) -> Result<(), ModelError> {
    let key = Key::from_urlsafe(encoded)?;

    if json_mode {
        let ancestry: Vec<String> = key.ancestry().iter().map(Key::joined).collect();
        print_json(&serde_json::json!({
            "kind": key.kind(),
            "id": key.id().map(ToString::to_string),
            "joined": key.joined(),
            "ancestry": ancestry,
        }));
    } else {
        println!("{}", key.joined());
    }
    Ok(())
}
