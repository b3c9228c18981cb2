//! # Configuration
//!
//! The `canteen.toml` file: where the store lives, how the adapter behaves,
//! and which model kinds it holds.
//!
//! ```toml
//! [store]
//! path = "canteen.redb"
//! backend = "redis"
//!
//! [adapter]
//! redis_mode = "hashkind"
//!
//! [[model]]
//! kind = "Person"
//! vertex = true
//!
//! [[model.property]]
//! name = "name"
//! basetype = "string"
//! required = true
//!
//! [[model]]
//! kind = "Follows"
//! edge = { origin = "Person", peering = ["Person"], directed = true }
//! ```

use canteen_model::{
    AdapterConfig, AdapterRegistry, Basetype, EdgeSpec, ModelError, Property, Schema, SchemaRole,
    Value,
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Largest config file the CLI will read (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// FILE LAYOUT
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanteenConfig {
    pub store: StoreConfig,
    pub adapter: AdapterConfig,
    #[serde(rename = "model")]
    pub models: Vec<ModelConfig>,
}

/// Which adapter the CLI opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Redis-style adapter over a redb file.
    #[default]
    Redis,
    /// In-memory adapter; nothing outlives the process.
    Memory,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memory => "inmemory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub backend: BackendKind,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("canteen.redb"),
            backend: BackendKind::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub kind: String,
    #[serde(default)]
    pub vertex: bool,
    #[serde(default)]
    pub edge: Option<EdgeConfig>,
    #[serde(default, rename = "property")]
    pub properties: Vec<PropertyConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeConfig {
    pub origin: String,
    pub peering: Vec<String>,
    #[serde(default = "default_true")]
    pub directed: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyConfig {
    pub name: String,
    #[serde(default)]
    pub basetype: Basetype,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub repeated: bool,
    #[serde(default = "default_true")]
    pub indexed: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

// =============================================================================
// LOADING
// =============================================================================

impl CanteenConfig {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            ModelError::StorageError(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ModelError::DeserializationError(format!(
                "config '{}' is {} bytes, limit is {}",
                path.display(),
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            ModelError::StorageError(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        let config = Self::parse(&text)?;
        tracing::debug!(
            path = %path.display(),
            models = config.models.len(),
            "config loaded"
        );
        Ok(config)
    }

    /// Parse config text.
    pub fn parse(text: &str) -> Result<Self, ModelError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ModelError::DeserializationError(format!("invalid config: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ModelError> {
        let mut seen = BTreeSet::new();
        for model in &self.models {
            if !seen.insert(model.kind.as_str()) {
                return Err(ModelError::InvalidAttribute {
                    op: "declare",
                    name: "kind".to_string(),
                    kind: model.kind.clone(),
                });
            }
            if model.vertex && model.edge.is_some() {
                return Err(ModelError::InvalidEdge(format!(
                    "\"{}\" cannot be both a vertex and an edge",
                    model.kind
                )));
            }
        }
        Ok(())
    }

    /// Bind every declared model to the configured backend, keyed by kind.
    pub fn bind(
        &self,
        registry: &AdapterRegistry,
    ) -> Result<BTreeMap<String, Arc<Schema>>, ModelError> {
        let mut schemas = BTreeMap::new();
        for model in &self.models {
            let schema = model.build(registry, self.store.backend.name())?;
            schemas.insert(model.kind.clone(), schema);
        }
        Ok(schemas)
    }
}

impl ModelConfig {
    fn role(&self) -> SchemaRole {
        match (&self.edge, self.vertex) {
            (Some(edge), _) => {
                let peering: Vec<&str> = edge.peering.iter().map(String::as_str).collect();
                let spec = if edge.directed {
                    EdgeSpec::directed(&edge.origin, &peering)
                } else {
                    EdgeSpec::undirected(&edge.origin, &peering)
                };
                SchemaRole::Edge(spec)
            }
            (None, true) => SchemaRole::Vertex,
            (None, false) => SchemaRole::Model,
        }
    }

    fn build(&self, registry: &AdapterRegistry, adapter: &str) -> Result<Arc<Schema>, ModelError> {
        let mut builder = Schema::define(&self.kind).role(self.role());
        for property in &self.properties {
            builder = builder.property(property.build()?);
        }
        builder.bind_from(registry, Some(adapter))
    }
}

impl PropertyConfig {
    fn build(&self) -> Result<Property, ModelError> {
        let mut property =
            Property::new(&self.name, self.basetype.clone()).indexed(self.indexed);
        if self.required {
            property = property.required();
        }
        if self.repeated {
            property = property.repeated();
        }
        if let Some(default) = &self.default {
            property = property.default_value(Value::from_json(default, &self.basetype)?);
        }
        Ok(property)
    }
}
