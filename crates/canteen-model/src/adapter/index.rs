//! # Index Generation
//!
//! Every stored entity participates in three families of indexes:
//!
//! - **Meta indexes**: the set of all keys, the per-kind key set, and the
//!   entity-group set (keyed by the encoded root key, or the empty group for
//!   roots).
//! - **Property indexes**: one entry per indexed property value. Sortable
//!   values (numbers, dates, datetimes) go to a scored series; every other
//!   value goes to a set keyed by a converter token.
//! - **Graph indexes**: role markers for vertices and edges, plus adjacency
//!   sets keyed by vertex (see [`crate::graph`]).
//!
//! Adapters record every entry they write in a per-key reverse index and clean
//! through it, so cleaning never has to re-derive entries from values that may
//! have changed since.

use crate::adapter::KindRegistry;
use crate::graph::{self, GraphIndex, GraphToken};
use crate::key::Key;
use crate::model::EntityData;
use crate::primitives::{
    DIRECTED_TOKEN, EDGE_PREFIX, GRAPH_PREFIX, GROUP_PREFIX, INDEX_PREFIX, KEY_PREFIX,
    KEY_SEPARATOR, KIND_PREFIX, MAGIC_DATE, MAGIC_DATETIME, MAGIC_EDGE, MAGIC_KEY,
    MAGIC_SEPARATOR, MAGIC_TIME, MAGIC_VERTEX, PATH_SEPARATOR, UNDIRECTED_TOKEN, VERTEX_PREFIX,
};
use crate::schema::Schema;
use crate::types::{Score, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Series tag for plain numbers.
pub const NUMERIC_TAG: u8 = 0x0;

// =============================================================================
// INDEX NAMES
// =============================================================================

/// Identifies one index bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IndexName {
    /// Every stored key.
    Key,
    /// Keys of one kind.
    Kind(String),
    /// Members of an entity group; `None` is the group of root entities.
    Group(Option<String>),
    /// Set index of one property value.
    Value {
        kind: String,
        property: String,
        token: String,
    },
    /// Sorted index of one property, per converter tag.
    Series {
        kind: String,
        property: String,
        tag: u8,
    },
    Vertex,
    Edge,
    EdgeClass { directed: bool },
    /// Adjacency set of an encoded vertex key.
    Graph { vertex: String, token: GraphToken },
}

impl IndexName {
    /// Whether the bucket is scored (sorted) rather than a plain set.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        matches!(self, Self::Series { .. })
    }

    /// Storage name of the bucket, as used by key-value backends.
    #[must_use]
    pub fn render(&self) -> String {
        let join = |parts: &[&str]| parts.join(MAGIC_SEPARATOR);
        match self {
            Self::Key => KEY_PREFIX.to_string(),
            Self::Kind(kind) => join(&[KIND_PREFIX, kind]),
            Self::Group(None) => GROUP_PREFIX.to_string(),
            Self::Group(Some(root)) => join(&[GROUP_PREFIX, root]),
            Self::Value {
                kind,
                property,
                token,
            } => join(&[INDEX_PREFIX, &property_path(kind, property), token]),
            Self::Series {
                kind,
                property,
                tag,
            } => join(&[
                INDEX_PREFIX,
                &property_path(kind, property),
                &tag.to_string(),
            ]),
            Self::Vertex => VERTEX_PREFIX.to_string(),
            Self::Edge => EDGE_PREFIX.to_string(),
            Self::EdgeClass { directed: true } => join(&[EDGE_PREFIX, DIRECTED_TOKEN]),
            Self::EdgeClass { directed: false } => join(&[EDGE_PREFIX, UNDIRECTED_TOKEN]),
            Self::Graph { vertex, token } => join(&[GRAPH_PREFIX, vertex, &token.to_string()]),
        }
    }
}

fn property_path(kind: &str, property: &str) -> String {
    format!("{}{}{}", kind, PATH_SEPARATOR, property)
}

/// One membership of an encoded key in one bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: IndexName,
    pub member: String,
    /// Set for sorted buckets only.
    pub score: Option<Score>,
}

impl IndexEntry {
    fn set(name: IndexName, member: &str) -> Self {
        Self {
            name,
            member: member.to_string(),
            score: None,
        }
    }
}

// =============================================================================
// CONVERTERS
// =============================================================================

/// Where a single property value lands.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum IndexSlot {
    Series { tag: u8, score: Score },
    Token(String),
}

impl IndexSlot {
    pub(crate) fn into_name(self, kind: &str, property: &str) -> (IndexName, Option<Score>) {
        match self {
            Self::Series { tag, score } => (
                IndexName::Series {
                    kind: kind.to_string(),
                    property: property.to_string(),
                    tag,
                },
                Some(score),
            ),
            Self::Token(token) => (
                IndexName::Value {
                    kind: kind.to_string(),
                    property: property.to_string(),
                    token,
                },
                None,
            ),
        }
    }
}

/// Convert one scalar value to its index slot. `Null` and nested lists are
/// not indexed.
pub(crate) fn index_slot(value: &Value, registry: &KindRegistry) -> Option<IndexSlot> {
    let series = |tag: u8| value.score().map(|score| IndexSlot::Series { tag, score });
    match value {
        Value::Null | Value::List(_) => None,
        Value::Int(_) | Value::Float(_) => series(NUMERIC_TAG),
        Value::Date(_) => series(MAGIC_DATE),
        Value::DateTime(_) => series(MAGIC_DATETIME),
        Value::Time(_) => Some(IndexSlot::Token(format!(
            "{}{}{}",
            MAGIC_TIME,
            KEY_SEPARATOR,
            value.to_json().as_str().unwrap_or_default()
        ))),
        Value::Key(key) => Some(IndexSlot::Token(key_token(
            registry.role_tag(key.kind()),
            key,
        ))),
        Value::Bool(_) | Value::String(_) | Value::Json(_) => {
            Some(IndexSlot::Token(value.to_json().to_string()))
        }
    }
}

fn key_token(tag: u8, key: &Key) -> String {
    format!("{}{}{}", tag, KEY_SEPARATOR, key.urlsafe())
}

/// Every slot a key value may sit under.
///
/// The role tag is taken from the registry when an entry is written, so
/// entries written before the key's kind was bound as a vertex or edge keep
/// the plain key tag. Lookups consult all of them.
pub(crate) fn key_slots(key: &Key) -> Vec<IndexSlot> {
    [MAGIC_KEY, MAGIC_VERTEX, MAGIC_EDGE]
        .into_iter()
        .map(|tag| IndexSlot::Token(key_token(tag, key)))
        .collect()
}

// =============================================================================
// BUNDLES
// =============================================================================

/// Everything written for one key.
///
/// `properties` is `None` when the bundle was generated without entity data
/// (for cleaning), in which case `graph` holds only role markers.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexBundle {
    pub encoded: String,
    pub meta: Vec<IndexEntry>,
    pub properties: Option<Vec<IndexEntry>>,
    pub graph: Vec<IndexEntry>,
}

impl IndexBundle {
    /// All entries, sorted and deduplicated.
    #[must_use]
    pub fn entries(&self) -> Vec<IndexEntry> {
        let mut all: BTreeSet<IndexEntry> = self.meta.iter().cloned().collect();
        all.extend(self.properties.iter().flatten().cloned());
        all.extend(self.graph.iter().cloned());
        all.into_iter().collect()
    }
}

/// Meta entries for an encoded key.
pub(crate) fn meta_indexes(key: &Key, encoded: &str, encode: &dyn Fn(&Key) -> String) -> Vec<IndexEntry> {
    let group = match key.parent() {
        None => None,
        Some(_) => Some(encode(key.root())),
    };
    vec![
        IndexEntry::set(IndexName::Key, encoded),
        IndexEntry::set(IndexName::Kind(key.kind().to_string()), encoded),
        IndexEntry::set(IndexName::Group(group), encoded),
    ]
}

/// Build the full bundle for `key`.
pub(crate) fn generate(
    registry: &KindRegistry,
    encode: &dyn Fn(&Key) -> String,
    key: &Key,
    schema: &Schema,
    data: Option<&EntityData>,
) -> IndexBundle {
    let encoded = encode(key);
    let meta = meta_indexes(key, &encoded, encode);

    let properties = data.map(|data| {
        let mut entries = Vec::new();
        for property in schema.properties().iter().filter(|p| p.is_indexed()) {
            let Some(value) = data.get(property.name()) else {
                continue;
            };
            let items = match value {
                Value::List(items) => items.as_slice(),
                scalar => std::slice::from_ref(scalar),
            };
            for item in items {
                if let Some(slot) = index_slot(item, registry) {
                    let (name, score) = slot.into_name(key.kind(), property.name());
                    entries.push(IndexEntry {
                        name,
                        member: encoded.clone(),
                        score,
                    });
                }
            }
        }
        entries
    });

    let graph = graph::graph_indexes(schema.role(), &encoded, data, encode)
        .into_iter()
        .map(|index| match index {
            GraphIndex::Vertex => IndexEntry::set(IndexName::Vertex, &encoded),
            GraphIndex::Edge => IndexEntry::set(IndexName::Edge, &encoded),
            GraphIndex::EdgeClass { directed } => {
                IndexEntry::set(IndexName::EdgeClass { directed }, &encoded)
            }
            GraphIndex::Adjacency {
                vertex,
                token,
                member,
            } => IndexEntry::set(IndexName::Graph { vertex, token }, &member),
        })
        .collect();

    IndexBundle {
        encoded,
        meta,
        properties,
        graph,
    }
}

// =============================================================================
// TESTS
// =============================================================================
