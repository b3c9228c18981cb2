//! # Graph Specialisation
//!
//! Vertices and edges are ordinary models with an extra role on their
//! schema. A vertex schema is tagged as a graph node; an edge schema carries
//! an [`EdgeSpec`] and gains endpoint properties automatically:
//!
//! - directed edges: `source` (key) and `target` (key, repeated)
//! - undirected edges: `peers` (key, repeated)
//!
//! Adapters index edges twice: once through the regular property indexes and
//! once through adjacency indexes keyed by vertex, which back
//! `EdgeFilter` queries.

use crate::key::Key;
use crate::model::Model;
use crate::primitives::{
    IN_TOKEN, MAGIC_EDGE, MAGIC_KEY, MAGIC_VERTEX, NEIGHBORS_TOKEN, OUT_TOKEN, PATH_SEPARATOR,
    PEERS_TOKEN,
};
use crate::schema::{Property, Schema};
use crate::types::{Basetype, ModelError, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Endpoint property of directed edges.
pub const SOURCE_PROPERTY: &str = "source";
/// Endpoint list property of directed edges.
pub const TARGET_PROPERTY: &str = "target";
/// Endpoint list property of undirected edges.
pub const PEERS_PROPERTY: &str = "peers";

// =============================================================================
// ROLES
// =============================================================================

/// How an edge connects vertex kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Kind of the originating vertex.
    pub origin: String,
    /// Kinds the edge may point at (or connect with, when undirected).
    pub peering: Vec<String>,
    pub directed: bool,
}

impl EdgeSpec {
    #[must_use]
    pub fn directed(origin: impl Into<String>, targets: &[&str]) -> Self {
        Self {
            origin: origin.into(),
            peering: targets.iter().map(|t| (*t).to_string()).collect(),
            directed: true,
        }
    }

    #[must_use]
    pub fn undirected(origin: impl Into<String>, peers: &[&str]) -> Self {
        Self {
            origin: origin.into(),
            peering: peers.iter().map(|p| (*p).to_string()).collect(),
            directed: false,
        }
    }

    /// Properties injected into every edge schema built from this spec.
    pub(crate) fn endpoint_properties(&self) -> Vec<Property> {
        if self.directed {
            vec![
                Property::new(SOURCE_PROPERTY, Basetype::Key).required(),
                Property::new(TARGET_PROPERTY, Basetype::Key)
                    .required()
                    .repeated(),
            ]
        } else {
            vec![
                Property::new(PEERS_PROPERTY, Basetype::Key)
                    .required()
                    .repeated(),
            ]
        }
    }

    fn accepts_peer(&self, kind: &str) -> bool {
        self.origin == kind || self.peering.iter().any(|p| p == kind)
    }
}

/// What a schema describes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SchemaRole {
    #[default]
    Model,
    Vertex,
    Edge(EdgeSpec),
}

impl SchemaRole {
    /// Converter tag used when keys of this role appear as property values.
    #[must_use]
    pub fn magic_tag(&self) -> u8 {
        match self {
            Self::Model => MAGIC_KEY,
            Self::Vertex => MAGIC_VERTEX,
            Self::Edge(_) => MAGIC_EDGE,
        }
    }

    #[must_use]
    pub fn edge_spec(&self) -> Option<&EdgeSpec> {
        match self {
            Self::Edge(spec) => Some(spec),
            _ => None,
        }
    }
}

// =============================================================================
// ADJACENCY INDEXES
// =============================================================================

/// Which adjacency list of a vertex an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GraphToken {
    /// Directed edges leaving the vertex.
    Out,
    /// Directed edges arriving at the vertex.
    In,
    /// Undirected edges touching the vertex.
    Peers,
    /// Every adjacent vertex.
    Neighbors,
    /// Vertices reached by leaving edges.
    NeighborsOut,
    /// Vertices reaching this one.
    NeighborsIn,
}

impl fmt::Display for GraphToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Out => write!(f, "{}", OUT_TOKEN),
            Self::In => write!(f, "{}", IN_TOKEN),
            Self::Peers => write!(f, "{}", PEERS_TOKEN),
            Self::Neighbors => write!(f, "{}", NEIGHBORS_TOKEN),
            Self::NeighborsOut => write!(f, "{}{}{}", NEIGHBORS_TOKEN, PATH_SEPARATOR, OUT_TOKEN),
            Self::NeighborsIn => write!(f, "{}{}{}", NEIGHBORS_TOKEN, PATH_SEPARATOR, IN_TOKEN),
        }
    }
}

/// Separates the neighbour from the edge in neighbour-index members.
///
/// Each member names the edge it came from, so deleting one of two parallel
/// edges leaves the other's adjacency intact.
pub const NEIGHBOR_MEMBER_SEPARATOR: char = '.';

/// One graph index entry produced for a stored vertex or edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIndex {
    /// The key is a vertex.
    Vertex,
    /// The key is an edge.
    Edge,
    /// The key is a directed or undirected edge.
    EdgeClass { directed: bool },
    /// Adjacency entry under an encoded vertex key.
    Adjacency {
        vertex: String,
        token: GraphToken,
        member: String,
    },
}

/// Build the graph indexes for one entity.
///
/// Without `data` only the role markers are produced.
pub(crate) fn graph_indexes(
    role: &SchemaRole,
    encoded: &str,
    data: Option<&crate::model::EntityData>,
    encode: &dyn Fn(&Key) -> String,
) -> Vec<GraphIndex> {
    let spec = match role {
        SchemaRole::Model => return Vec::new(),
        SchemaRole::Vertex => return vec![GraphIndex::Vertex],
        SchemaRole::Edge(spec) => spec,
    };

    let mut graph = vec![
        GraphIndex::Edge,
        GraphIndex::EdgeClass {
            directed: spec.directed,
        },
    ];
    let Some(data) = data else {
        return graph;
    };

    let adjacency = |vertex: &str, token: GraphToken, member: String| GraphIndex::Adjacency {
        vertex: vertex.to_string(),
        token,
        member,
    };
    let neighbor = |other: &str| format!("{}{}{}", other, NEIGHBOR_MEMBER_SEPARATOR, encoded);

    if spec.directed {
        let Some(source) = data.get(SOURCE_PROPERTY).and_then(Value::as_key) else {
            return graph;
        };
        let source = encode(source);
        for target in key_list(data.get(TARGET_PROPERTY)) {
            let target = encode(target);
            graph.push(adjacency(&source, GraphToken::Out, encoded.to_string()));
            graph.push(adjacency(&target, GraphToken::In, encoded.to_string()));
            graph.push(adjacency(&source, GraphToken::Neighbors, neighbor(&target)));
            graph.push(adjacency(&target, GraphToken::Neighbors, neighbor(&source)));
            graph.push(adjacency(&source, GraphToken::NeighborsOut, neighbor(&target)));
            graph.push(adjacency(&target, GraphToken::NeighborsIn, neighbor(&source)));
        }
    } else {
        let peers: Vec<String> = key_list(data.get(PEERS_PROPERTY))
            .into_iter()
            .map(encode)
            .collect();
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        for (i, a) in peers.iter().enumerate() {
            for b in peers.iter().skip(i + 1) {
                if a == b {
                    continue;
                }
                let pair = if a < b {
                    (a.clone(), b.clone())
                } else {
                    (b.clone(), a.clone())
                };
                if !seen.insert(pair) {
                    continue;
                }
                graph.push(adjacency(a, GraphToken::Peers, encoded.to_string()));
                graph.push(adjacency(b, GraphToken::Peers, encoded.to_string()));
                graph.push(adjacency(a, GraphToken::Neighbors, neighbor(b)));
                graph.push(adjacency(b, GraphToken::Neighbors, neighbor(a)));
            }
        }
    }
    graph
}

/// Extract the neighbour part of a neighbour-index member.
#[must_use]
pub fn neighbor_of(member: &str) -> &str {
    member
        .split_once(NEIGHBOR_MEMBER_SEPARATOR)
        .map(|(neighbor, _)| neighbor)
        .unwrap_or(member)
}

fn key_list(value: Option<&Value>) -> Vec<&Key> {
    match value {
        Some(Value::List(items)) => items.iter().filter_map(Value::as_key).collect(),
        Some(Value::Key(key)) => vec![key],
        _ => Vec::new(),
    }
}

// =============================================================================
// EDGE VALIDATION
// =============================================================================

/// Check edge endpoints against the schema's edge spec.
pub(crate) fn validate_edge(schema: &Schema, model: &Model) -> Result<(), ModelError> {
    let Some(spec) = schema.role().edge_spec() else {
        return Ok(());
    };

    if spec.directed {
        if let Some(Value::Key(source)) = model.get_raw(SOURCE_PROPERTY)?
            && source.kind() != spec.origin
        {
            return Err(ModelError::InvalidEdge(format!(
                "source kind \"{}\" is not \"{}\"",
                source.kind(),
                spec.origin
            )));
        }
        for target in key_list(model.get_raw(TARGET_PROPERTY)?) {
            if !spec.peering.iter().any(|p| p == target.kind()) {
                return Err(ModelError::InvalidEdge(format!(
                    "target kind \"{}\" is not one of {:?}",
                    target.kind(),
                    spec.peering
                )));
            }
        }
    } else {
        let peers = key_list(model.get_raw(PEERS_PROPERTY)?);
        if !peers.is_empty() && peers.len() < 2 {
            return Err(ModelError::InvalidEdge(
                "undirected edges need at least two peers".to_string(),
            ));
        }
        if let Some(peer) = peers.iter().find(|p| !spec.accepts_peer(p.kind())) {
            return Err(ModelError::InvalidEdge(format!(
                "peer kind \"{}\" is not accepted by this edge",
                peer.kind()
            )));
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
