//! # Memory Backend
//!
//! [`KeyValueBackend`] over process memory. Every operation takes the one
//! mutex, so pipelines are trivially atomic.

use crate::storage::{Command, KeyValueBackend, increment};
use crate::types::{ModelError, Score};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Bound, RangeBounds};

#[derive(Debug, Default)]
struct Tables {
    strings: BTreeMap<String, Vec<u8>>,
    hashes: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    sets: BTreeMap<String, BTreeSet<String>>,
    sorted: BTreeMap<String, BTreeSet<(Score, String)>>,
}

impl Tables {
    fn apply(&mut self, command: &Command) {
        match command {
            Command::Set { key, value } => {
                self.strings.insert(key.clone(), value.clone());
            }
            Command::Delete { key } => {
                self.strings.remove(key);
            }
            Command::HashSet { key, field, value } => {
                self.hashes
                    .entry(key.clone())
                    .or_default()
                    .insert(field.clone(), value.clone());
            }
            Command::HashDelete { key, field } => {
                if let Some(hash) = self.hashes.get_mut(key) {
                    hash.remove(field);
                    if hash.is_empty() {
                        self.hashes.remove(key);
                    }
                }
            }
            Command::SetAdd { key, member } => {
                self.sets
                    .entry(key.clone())
                    .or_default()
                    .insert(member.clone());
            }
            Command::SetRemove { key, member } => {
                if let Some(set) = self.sets.get_mut(key) {
                    set.remove(member);
                    if set.is_empty() {
                        self.sets.remove(key);
                    }
                }
            }
            Command::SortedAdd { key, score, member } => {
                self.sorted
                    .entry(key.clone())
                    .or_default()
                    .insert((*score, member.clone()));
            }
            Command::SortedRemove { key, score, member } => {
                if let Some(sorted) = self.sorted.get_mut(key) {
                    sorted.remove(&(*score, member.clone()));
                    if sorted.is_empty() {
                        self.sorted.remove(key);
                    }
                }
            }
        }
    }
}

/// Process-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ModelError> {
        Ok(self.tables.lock().strings.get(key).cloned())
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, ModelError> {
        Ok(self
            .tables
            .lock()
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    fn hash_fields(&self, key: &str) -> Result<Vec<String>, ModelError> {
        Ok(self
            .tables
            .lock()
            .hashes
            .get(key)
            .map(|hash| hash.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn hash_increment(&self, key: &str, field: &str, by: u64) -> Result<u64, ModelError> {
        let mut tables = self.tables.lock();
        let hash = tables.hashes.entry(key.to_string()).or_default();
        let next = increment(hash.get(field).map(Vec::as_slice), by)?;
        hash.insert(field.to_string(), next.to_string().into_bytes());
        Ok(next)
    }

    fn members(&self, key: &str) -> Result<BTreeSet<String>, ModelError> {
        Ok(self.tables.lock().sets.get(key).cloned().unwrap_or_default())
    }

    fn range_by_score(
        &self,
        key: &str,
        low: Bound<Score>,
        high: Bound<Score>,
    ) -> Result<BTreeSet<String>, ModelError> {
        let tables = self.tables.lock();
        let Some(sorted) = tables.sorted.get(key) else {
            return Ok(BTreeSet::new());
        };
        let bounds = (low, high);
        Ok(sorted
            .iter()
            .filter(|(score, _)| bounds.contains(score))
            .map(|(_, member)| member.clone())
            .collect())
    }

    fn keys(&self) -> Result<Vec<String>, ModelError> {
        Ok(self.tables.lock().strings.keys().cloned().collect())
    }

    fn hashes(&self) -> Result<Vec<String>, ModelError> {
        Ok(self.tables.lock().hashes.keys().cloned().collect())
    }

    fn execute(&self, pipeline: &[Command]) -> Result<(), ModelError> {
        let mut tables = self.tables.lock();
        for command in pipeline {
            tables.apply(command);
        }
        Ok(())
    }
}
