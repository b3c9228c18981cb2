//! # Storage Primitives
//!
//! Fixed names, separators and magic tags shared by every adapter.
//!
//! These values are part of the persisted format: index names and key
//! encodings written by one process must be readable by the next, so none of
//! them may change without a migration.

// =============================================================================
// KEY ENCODING
// =============================================================================

/// Separator between flattened key segments in the joined form.
///
/// Name ids may not contain this character.
pub const KEY_SEPARATOR: char = ':';

/// Number of segments one key level occupies: `(parent, kind, id)`.
pub const KEY_SCHEMA_WIDTH: usize = 3;

// =============================================================================
// INDEX NAMES
// =============================================================================

/// Set of every stored key.
pub const KEY_PREFIX: &str = "__key__";

/// Per-kind set of keys.
pub const KIND_PREFIX: &str = "__kind__";

/// Entity-group membership, keyed by encoded root key.
pub const GROUP_PREFIX: &str = "__group__";

/// Property value indexes.
pub const INDEX_PREFIX: &str = "__index__";

/// Per-key record of every index entry written for it.
pub const REVERSE_PREFIX: &str = "__reverse__";

/// Set of every stored vertex key.
pub const VERTEX_PREFIX: &str = "__vertex__";

/// Set of every stored edge key.
pub const EDGE_PREFIX: &str = "__edge__";

/// Adjacency indexes, keyed by encoded vertex key.
pub const GRAPH_PREFIX: &str = "__graph__";

/// Redis-style metadata hash (id counters).
pub const META_PREFIX: &str = "__meta__";

/// Field holding the id counter inside a metadata hash.
pub const ID_FIELD: &str = "__id__";

/// Joins the components of a Redis-style index name.
pub const MAGIC_SEPARATOR: &str = "::";

/// Joins property paths inside an index name.
pub const PATH_SEPARATOR: &str = ".";

// =============================================================================
// GRAPH TOKENS
// =============================================================================

pub const OUT_TOKEN: &str = "out";
pub const IN_TOKEN: &str = "in";
pub const PEERS_TOKEN: &str = "peers";
pub const NEIGHBORS_TOKEN: &str = "neighbors";
pub const DIRECTED_TOKEN: &str = "directed";
pub const UNDIRECTED_TOKEN: &str = "undirected";

// =============================================================================
// MAGIC TAGS
// =============================================================================

/// Converter tag for plain key references.
pub const MAGIC_KEY: u8 = 0x1;

/// Converter tag for dates.
pub const MAGIC_DATE: u8 = 0x2;

/// Converter tag for times of day.
pub const MAGIC_TIME: u8 = 0x3;

/// Converter tag for datetimes.
pub const MAGIC_DATETIME: u8 = 0x4;

/// Converter tag for references to vertex keys.
pub const MAGIC_VERTEX: u8 = 0x5;

/// Converter tag for references to edge keys.
pub const MAGIC_EDGE: u8 = 0x6;

// =============================================================================
// QUERY PACKING
// =============================================================================

pub const PACK_OPTIONS: u8 = 0x0;
pub const PACK_FILTER: u8 = 0x2;
pub const PACK_KEY_FILTER: u8 = 0x3;
pub const PACK_EDGE_FILTER: u8 = 0x4;
pub const PACK_SORT: u8 = 0x5;
