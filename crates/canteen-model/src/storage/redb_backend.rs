//! # redb Backend
//!
//! [`KeyValueBackend`] over a redb database file.
//!
//! Each Redis structure maps to one table with a composite key, so every
//! lookup is a point read or a prefix range scan:
//!
//! - strings: `key -> bytes`
//! - hashes: `(key, field) -> bytes`
//! - sets: `(key, member) -> ()`
//! - sorted sets: `(key, ordered score bits, member) -> ()`
//!
//! A pipeline runs in one write transaction; redb serialises writers and
//! commits copy-on-write, so a crash keeps either all of a pipeline or none.

use crate::storage::{Command, KeyValueBackend, increment};
use crate::types::{ModelError, Score};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Bound, RangeBounds};
use std::path::Path;

/// String slots: key -> bytes
const STRINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("strings");

/// Hash fields: (key, field) -> bytes
const HASHES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("hashes");

/// Set members: (key, member) -> ()
const SETS: TableDefinition<(&str, &str), ()> = TableDefinition::new("sets");

/// Sorted set members: (key, score bits, member) -> ()
const SORTED: TableDefinition<(&str, u64, &str), ()> = TableDefinition::new("sorted");

fn storage_error(e: impl fmt::Display) -> ModelError {
    ModelError::StorageError(e.to_string())
}

/// Disk-backed key-value store.
pub struct RedbBackend {
    db: Database,
}

impl fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbBackend").finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let db = Database::create(path.as_ref()).map_err(storage_error)?;

        // Create tables so read transactions never miss one
        {
            let write_txn = db.begin_write().map_err(storage_error)?;
            let _ = write_txn.open_table(STRINGS).map_err(storage_error)?;
            let _ = write_txn.open_table(HASHES).map_err(storage_error)?;
            let _ = write_txn.open_table(SETS).map_err(storage_error)?;
            let _ = write_txn.open_table(SORTED).map_err(storage_error)?;
            write_txn.commit().map_err(storage_error)?;
        }

        tracing::debug!(path = %path.as_ref().display(), "redb store opened");
        Ok(Self { db })
    }
}

impl KeyValueBackend for RedbBackend {
    fn name(&self) -> &'static str {
        "redb"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ModelError> {
        let read_txn = self.db.begin_read().map_err(storage_error)?;
        let table = read_txn.open_table(STRINGS).map_err(storage_error)?;
        Ok(table
            .get(key)
            .map_err(storage_error)?
            .map(|v| v.value().to_vec()))
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, ModelError> {
        let read_txn = self.db.begin_read().map_err(storage_error)?;
        let table = read_txn.open_table(HASHES).map_err(storage_error)?;
        Ok(table
            .get((key, field))
            .map_err(storage_error)?
            .map(|v| v.value().to_vec()))
    }

    fn hash_fields(&self, key: &str) -> Result<Vec<String>, ModelError> {
        let read_txn = self.db.begin_read().map_err(storage_error)?;
        let table = read_txn.open_table(HASHES).map_err(storage_error)?;

        let mut fields = Vec::new();
        for entry in table.range((key, "")..).map_err(storage_error)? {
            let (entry_key, _) = entry.map_err(storage_error)?;
            let (hash, field) = entry_key.value();
            if hash != key {
                break;
            }
            fields.push(field.to_string());
        }
        Ok(fields)
    }

    fn hash_increment(&self, key: &str, field: &str, by: u64) -> Result<u64, ModelError> {
        let write_txn = self.db.begin_write().map_err(storage_error)?;
        let next = {
            let mut table = write_txn.open_table(HASHES).map_err(storage_error)?;
            let current = table
                .get((key, field))
                .map_err(storage_error)?
                .map(|v| v.value().to_vec());
            let next = increment(current.as_deref(), by)?;
            table
                .insert((key, field), next.to_string().as_bytes())
                .map_err(storage_error)?;
            next
        };
        write_txn.commit().map_err(storage_error)?;
        Ok(next)
    }

    fn members(&self, key: &str) -> Result<BTreeSet<String>, ModelError> {
        let read_txn = self.db.begin_read().map_err(storage_error)?;
        let table = read_txn.open_table(SETS).map_err(storage_error)?;

        let mut members = BTreeSet::new();
        for entry in table.range((key, "")..).map_err(storage_error)? {
            let (entry_key, _) = entry.map_err(storage_error)?;
            let (set, member) = entry_key.value();
            if set != key {
                break;
            }
            members.insert(member.to_string());
        }
        Ok(members)
    }

    fn range_by_score(
        &self,
        key: &str,
        low: Bound<Score>,
        high: Bound<Score>,
    ) -> Result<BTreeSet<String>, ModelError> {
        let read_txn = self.db.begin_read().map_err(storage_error)?;
        let table = read_txn.open_table(SORTED).map_err(storage_error)?;

        let start = match low {
            Bound::Included(score) | Bound::Excluded(score) => score.to_ordered_bits(),
            Bound::Unbounded => 0,
        };
        let bounds = (low, high);
        let mut members = BTreeSet::new();
        for entry in table.range((key, start, "")..).map_err(storage_error)? {
            let (entry_key, _) = entry.map_err(storage_error)?;
            let (sorted, bits, member) = entry_key.value();
            if sorted != key {
                break;
            }
            let score = Score::from_ordered_bits(bits);
            if bounds.contains(&score) {
                members.insert(member.to_string());
            } else if above(&high, &score) {
                break;
            }
        }
        Ok(members)
    }

    fn keys(&self) -> Result<Vec<String>, ModelError> {
        let read_txn = self.db.begin_read().map_err(storage_error)?;
        let table = read_txn.open_table(STRINGS).map_err(storage_error)?;

        let mut keys = Vec::new();
        for entry in table.iter().map_err(storage_error)? {
            let (entry_key, _) = entry.map_err(storage_error)?;
            keys.push(entry_key.value().to_string());
        }
        Ok(keys)
    }

    fn hashes(&self) -> Result<Vec<String>, ModelError> {
        let read_txn = self.db.begin_read().map_err(storage_error)?;
        let table = read_txn.open_table(HASHES).map_err(storage_error)?;

        let mut hashes: Vec<String> = Vec::new();
        for entry in table.iter().map_err(storage_error)? {
            let (entry_key, _) = entry.map_err(storage_error)?;
            let (hash, _) = entry_key.value();
            if hashes.last().is_none_or(|last| last != hash) {
                hashes.push(hash.to_string());
            }
        }
        Ok(hashes)
    }

    fn execute(&self, pipeline: &[Command]) -> Result<(), ModelError> {
        let write_txn = self.db.begin_write().map_err(storage_error)?;
        {
            let mut strings = write_txn.open_table(STRINGS).map_err(storage_error)?;
            let mut hashes = write_txn.open_table(HASHES).map_err(storage_error)?;
            let mut sets = write_txn.open_table(SETS).map_err(storage_error)?;
            let mut sorted = write_txn.open_table(SORTED).map_err(storage_error)?;

            for command in pipeline {
                match command {
                    Command::Set { key, value } => {
                        strings
                            .insert(key.as_str(), value.as_slice())
                            .map_err(storage_error)?;
                    }
                    Command::Delete { key } => {
                        strings.remove(key.as_str()).map_err(storage_error)?;
                    }
                    Command::HashSet { key, field, value } => {
                        hashes
                            .insert((key.as_str(), field.as_str()), value.as_slice())
                            .map_err(storage_error)?;
                    }
                    Command::HashDelete { key, field } => {
                        hashes
                            .remove((key.as_str(), field.as_str()))
                            .map_err(storage_error)?;
                    }
                    Command::SetAdd { key, member } => {
                        sets.insert((key.as_str(), member.as_str()), ())
                            .map_err(storage_error)?;
                    }
                    Command::SetRemove { key, member } => {
                        sets.remove((key.as_str(), member.as_str()))
                            .map_err(storage_error)?;
                    }
                    Command::SortedAdd { key, score, member } => {
                        sorted
                            .insert((key.as_str(), score.to_ordered_bits(), member.as_str()), ())
                            .map_err(storage_error)?;
                    }
                    Command::SortedRemove { key, score, member } => {
                        sorted
                            .remove((key.as_str(), score.to_ordered_bits(), member.as_str()))
                            .map_err(storage_error)?;
                    }
                }
            }
        }
        write_txn.commit().map_err(storage_error)?;
        tracing::trace!(commands = pipeline.len(), "pipeline committed");
        Ok(())
    }
}

/// Whether `score` lies beyond the upper bound.
fn above(high: &Bound<Score>, score: &Score) -> bool {
    match high {
        Bound::Included(limit) => score > limit,
        Bound::Excluded(limit) => score >= limit,
        Bound::Unbounded => false,
    }
}
