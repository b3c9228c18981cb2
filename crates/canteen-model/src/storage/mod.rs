//! # Key-Value Storage
//!
//! The primitives the Redis-style adapter is written against: string slots,
//! hashes, sets and scored sets. Writes are batched into a pipeline of
//! [`Command`]s and applied atomically.
//!
//! Two backends are provided:
//! - [`MemoryBackend`]: process memory, one mutex
//! - [`RedbBackend`]: a redb database file, one write transaction per pipeline

pub mod memory;
pub mod redb_backend;

pub use memory::MemoryBackend;
pub use redb_backend::RedbBackend;

use crate::types::{ModelError, Score};
use std::collections::BTreeSet;
use std::ops::Bound;

/// One queued write.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `SET key value`
    Set { key: String, value: Vec<u8> },
    /// `DEL key`
    Delete { key: String },
    /// `HSET key field value`
    HashSet {
        key: String,
        field: String,
        value: Vec<u8>,
    },
    /// `HDEL key field`
    HashDelete { key: String, field: String },
    /// `SADD key member`
    SetAdd { key: String, member: String },
    /// `SREM key member`
    SetRemove { key: String, member: String },
    /// `ZADD key score member`
    SortedAdd {
        key: String,
        score: Score,
        member: String,
    },
    /// `ZREM key member`, with the score the member was added under.
    SortedRemove {
        key: String,
        score: Score,
        member: String,
    },
}

/// Storage engine behind the Redis-style adapter.
///
/// Reads see the last committed pipeline. `execute` applies a whole pipeline
/// or nothing.
pub trait KeyValueBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// `GET key`
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ModelError>;

    /// `HGET key field`
    fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, ModelError>;

    /// `HKEYS key`
    fn hash_fields(&self, key: &str) -> Result<Vec<String>, ModelError>;

    /// `HINCRBY key field by`, returning the new value. Atomic on its own.
    fn hash_increment(&self, key: &str, field: &str, by: u64) -> Result<u64, ModelError>;

    /// `SMEMBERS key`
    fn members(&self, key: &str) -> Result<BTreeSet<String>, ModelError>;

    /// `ZRANGEBYSCORE key low high`
    fn range_by_score(
        &self,
        key: &str,
        low: Bound<Score>,
        high: Bound<Score>,
    ) -> Result<BTreeSet<String>, ModelError>;

    /// Every string slot name.
    fn keys(&self) -> Result<Vec<String>, ModelError>;

    /// Every hash name.
    fn hashes(&self) -> Result<Vec<String>, ModelError>;

    /// Apply a pipeline atomically (`MULTI` ... `EXEC`).
    fn execute(&self, pipeline: &[Command]) -> Result<(), ModelError>;
}

/// Parse a counter stored by `hash_increment`.
fn parse_counter(raw: &[u8]) -> Result<u64, ModelError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| ModelError::StorageError("hash field is not an integer".to_string()))
}

fn increment(current: Option<&[u8]>, by: u64) -> Result<u64, ModelError> {
    let current = current.map(parse_counter).transpose()?.unwrap_or(0);
    current
        .checked_add(by)
        .ok_or_else(|| ModelError::StorageError("hash counter overflow".to_string()))
}
