//! # Adapter Configuration
//!
//! Behavioural switches shared by the indexed adapters. Every field has a
//! default, so an empty TOML table (or no table at all) is valid.

use serde::{Deserialize, Serialize};

/// Where the Redis-style adapter keeps entity records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedisMode {
    /// One string slot per encoded key.
    #[default]
    Toplevel,
    /// One hash per kind, fields keyed by encoded key.
    #[serde(alias = "hashkind")]
    HashKind,
    /// One hash per entity group, fields keyed by encoded key.
    #[serde(alias = "hashkey")]
    HashKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Sort string properties in reverse for ascending sorts, as older
    /// stores did.
    pub legacy_string_sort: bool,
    pub redis_mode: RedisMode,
    /// Rebuild every index when a persistent adapter is opened.
    pub reconcile_on_open: bool,
}
