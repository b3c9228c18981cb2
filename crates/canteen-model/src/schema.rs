//! # Schemas and Properties
//!
//! A [`Schema`] is the immutable definition of one kind: its properties, its
//! graph role, and the adapter that stores it. Schemas are built once at
//! startup and shared through `Arc`:
//!
//! ```ignore
//! let person = Schema::define("Person")
//!     .property(Property::new("name", Basetype::String).required())
//!     .property(Property::new("age", Basetype::Int))
//!     .bind(adapter.clone())?;
//!
//! let mut bob = person.create();
//! bob.set("name", "bob")?;
//! let key = bob.put()?;
//! ```
//!
//! Binding registers the schema with its adapter, so that stored entities of
//! this kind can be inflated again on read.

use crate::adapter::{AdapterRegistry, ModelAdapter};
use crate::graph::{EdgeSpec, PEERS_PROPERTY, SOURCE_PROPERTY, SchemaRole, TARGET_PROPERTY};
use crate::key::{Key, KeyFormat};
use crate::model::Model;
use crate::query::Query;
use crate::types::{Basetype, ModelError, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Name reserved for the model key in projections.
pub const KEY_PROPERTY: &str = "key";

// =============================================================================
// PROPERTY
// =============================================================================

/// Declaration of one model field.
///
/// Values are checked only by [`Property::valid`], which runs when a model is
/// written; assignment never validates.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    name: String,
    basetype: Basetype,
    default: Option<Value>,
    required: bool,
    repeated: bool,
    indexed: bool,
    options: BTreeMap<String, serde_json::Value>,
}

impl Property {
    /// Declare an optional, indexed, single-valued property.
    #[must_use]
    pub fn new(name: impl Into<String>, basetype: Basetype) -> Self {
        Self {
            name: name.into(),
            basetype,
            default: None,
            required: false,
            repeated: false,
            indexed: true,
            options: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    #[must_use]
    pub fn indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Attach a free-form option.
    #[must_use]
    pub fn option(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn basetype(&self) -> &Basetype {
        &self.basetype
    }

    #[must_use]
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn is_repeated(&self) -> bool {
        self.repeated
    }

    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    #[must_use]
    pub fn options(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.options
    }

    /// Validate a raw (explicit-mode) value for this property of `kind`.
    ///
    /// `None` means the property was never set.
    pub fn valid(&self, kind: &str, value: Option<&Value>) -> Result<(), ModelError> {
        let value = match value {
            None | Some(Value::Null) => {
                if self.required {
                    return Err(ModelError::PropertyRequired {
                        name: self.name.clone(),
                        kind: kind.to_string(),
                    });
                }
                return Ok(());
            }
            Some(value) => value,
        };

        let items: &[Value] = match value {
            Value::List(items) => {
                if !self.repeated {
                    return Err(ModelError::PropertyNotRepeated {
                        name: self.name.clone(),
                        kind: kind.to_string(),
                    });
                }
                items
            }
            scalar => {
                if self.repeated {
                    return Err(ModelError::PropertyRepeated {
                        name: self.name.clone(),
                        kind: kind.to_string(),
                    });
                }
                std::slice::from_ref(scalar)
            }
        };

        match items.iter().find(|item| !self.basetype.accepts(item)) {
            Some(bad) => Err(ModelError::InvalidPropertyValue {
                name: self.name.clone(),
                kind: kind.to_string(),
                got: bad.type_name().to_string(),
                expected: self.basetype.name(),
            }),
            None => Ok(()),
        }
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// Immutable definition of one kind, bound to its adapter.
pub struct Schema {
    kind: String,
    properties: Vec<Property>,
    role: SchemaRole,
    adapter: Arc<dyn ModelAdapter>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("kind", &self.kind)
            .field("properties", &self.properties)
            .field("role", &self.role)
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

impl Schema {
    /// Start defining a plain model kind.
    #[must_use]
    pub fn define(kind: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            kind: kind.into(),
            properties: Vec::new(),
            role: SchemaRole::Model,
        }
    }

    /// Start defining a vertex kind.
    #[must_use]
    pub fn vertex(kind: impl Into<String>) -> SchemaBuilder {
        Self::define(kind).role(SchemaRole::Vertex)
    }

    /// Start defining an edge kind.
    #[must_use]
    pub fn edge(kind: impl Into<String>, spec: EdgeSpec) -> SchemaBuilder {
        Self::define(kind).role(SchemaRole::Edge(spec))
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn role(&self) -> &SchemaRole {
        &self.role
    }

    /// Declared properties, in declaration order.
    #[must_use]
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn ModelAdapter> {
        &self.adapter
    }

    // -------------------------------------------------------------------------
    // Instances
    // -------------------------------------------------------------------------

    /// New, unpersisted instance with an id-less key.
    pub fn create(self: &Arc<Self>) -> Result<Model, ModelError> {
        Ok(Model::new(Arc::clone(self), Key::partial(&self.kind)?))
    }

    /// New instance with a key supplied in exactly one format.
    pub fn create_with_key(self: &Arc<Self>, format: KeyFormat) -> Result<Model, ModelError> {
        let key = format.resolve()?;
        self.check_kind(&key)?;
        Ok(Model::new(Arc::clone(self), key))
    }

    /// Rebuild an instance from a JSON-shaped dictionary.
    pub fn from_dict(
        self: &Arc<Self>,
        dict: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Model, ModelError> {
        let mut model = self.create()?;
        for (name, json) in dict {
            if name == KEY_PROPERTY {
                let encoded = json.as_str().ok_or_else(|| {
                    ModelError::InvalidKey(format!("key value {} is not a string", json))
                })?;
                let key = Key::from_urlsafe(encoded)?;
                self.check_kind(&key)?;
                model.set_key(key)?;
                continue;
            }
            let property = self.property(name).ok_or_else(|| ModelError::InvalidItem {
                op: "set",
                name: name.clone(),
                kind: self.kind.clone(),
            })?;
            model.set(name, Value::from_json(json, property.basetype())?)?;
        }
        Ok(model)
    }

    /// Rebuild an instance from a JSON object string.
    pub fn from_json(self: &Arc<Self>, json: &str) -> Result<Model, ModelError> {
        let parsed: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| ModelError::DeserializationError(e.to_string()))?;
        let dict = parsed.as_object().ok_or_else(|| {
            ModelError::DeserializationError("expected a JSON object".to_string())
        })?;
        self.from_dict(dict)
    }

    // -------------------------------------------------------------------------
    // Storage
    // -------------------------------------------------------------------------

    /// Fetch one entity of this kind.
    pub fn get(self: &Arc<Self>, key: &Key) -> Result<Option<Model>, ModelError> {
        self.check_kind(key)?;
        self.adapter.get_model(key)
    }

    /// Fetch several entities, preserving input order.
    pub fn get_multi(self: &Arc<Self>, keys: &[Key]) -> Result<Vec<Option<Model>>, ModelError> {
        for key in keys {
            self.check_kind(key)?;
        }
        self.adapter.get_models(keys)
    }

    /// Delete one entity of this kind and its indexes.
    pub fn delete(self: &Arc<Self>, key: &Key) -> Result<bool, ModelError> {
        self.check_kind(key)?;
        self.adapter.delete_model(key)
    }

    /// Start a query over this kind.
    #[must_use]
    pub fn query(self: &Arc<Self>) -> Query {
        Query::new(self)
    }

    // -------------------------------------------------------------------------
    // Graph
    // -------------------------------------------------------------------------

    /// Define an edge kind originating at this vertex kind, bound to the same adapter.
    pub fn spawn_edge(
        self: &Arc<Self>,
        kind: impl Into<String>,
        targets: &[&Arc<Schema>],
        directed: bool,
    ) -> Result<Arc<Schema>, ModelError> {
        if self.role != SchemaRole::Vertex {
            return Err(ModelError::InvalidEdge(format!(
                "\"{}\" is not a vertex kind",
                self.kind
            )));
        }
        if let Some(target) = targets.iter().find(|t| t.role != SchemaRole::Vertex) {
            return Err(ModelError::InvalidEdge(format!(
                "\"{}\" is not a vertex kind",
                target.kind
            )));
        }
        let peering: Vec<&str> = targets.iter().map(|t| t.kind()).collect();
        let spec = if directed {
            EdgeSpec::directed(&self.kind, &peering)
        } else {
            EdgeSpec::undirected(&self.kind, &peering)
        };
        Schema::edge(kind, spec).bind(Arc::clone(&self.adapter))
    }

    /// Build an unsaved edge instance connecting `source` to `targets`.
    ///
    /// For undirected edges the source becomes the first peer.
    pub fn connect(self: &Arc<Self>, source: &Key, targets: &[Key]) -> Result<Model, ModelError> {
        let spec = self.role.edge_spec().ok_or_else(|| {
            ModelError::InvalidEdge(format!("\"{}\" is not an edge kind", self.kind))
        })?;
        let mut edge = self.create()?;
        let targets: Vec<Value> = targets.iter().cloned().map(Value::Key).collect();
        if spec.directed {
            edge.set(SOURCE_PROPERTY, source.clone())?;
            edge.set(TARGET_PROPERTY, Value::List(targets))?;
        } else {
            let mut peers = vec![Value::Key(source.clone())];
            peers.extend(targets);
            edge.set(PEERS_PROPERTY, Value::List(peers))?;
        }
        Ok(edge)
    }

    fn check_kind(&self, key: &Key) -> Result<(), ModelError> {
        if key.kind() != self.kind {
            return Err(ModelError::InvalidKey(format!(
                "key of kind \"{}\" used with model \"{}\"",
                key.kind(),
                self.kind
            )));
        }
        Ok(())
    }
}

// =============================================================================
// SCHEMA BUILDER
// =============================================================================

/// Collects property declarations until the schema is bound to an adapter.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    kind: String,
    properties: Vec<Property>,
    role: SchemaRole,
}

impl SchemaBuilder {
    #[must_use]
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    #[must_use]
    pub fn role(mut self, role: SchemaRole) -> Self {
        self.role = role;
        self
    }

    /// Freeze the schema and register it with `adapter`.
    pub fn bind(self, adapter: Arc<dyn ModelAdapter>) -> Result<Arc<Schema>, ModelError> {
        Key::partial(&self.kind)?;

        let mut properties = Vec::with_capacity(self.properties.len() + 2);
        if let Some(spec) = self.role.edge_spec() {
            properties.extend(spec.endpoint_properties());
        }
        properties.extend(self.properties);

        for (i, property) in properties.iter().enumerate() {
            let duplicate = properties[..i].iter().any(|p| p.name == property.name);
            if property.name.is_empty() || property.name == KEY_PROPERTY || duplicate {
                return Err(ModelError::InvalidAttribute {
                    op: "define",
                    name: property.name.clone(),
                    kind: self.kind.clone(),
                });
            }
        }

        let schema = Arc::new(Schema {
            kind: self.kind,
            properties,
            role: self.role,
            adapter,
        });
        schema.adapter.register(&schema);
        tracing::debug!(kind = %schema.kind, adapter = schema.adapter.name(), "schema bound");
        Ok(schema)
    }

    /// Freeze the schema, resolving its adapter from a registry.
    ///
    /// `explicit` names a specific adapter; `None` takes the default one.
    pub fn bind_from(
        self,
        registry: &AdapterRegistry,
        explicit: Option<&str>,
    ) -> Result<Arc<Schema>, ModelError> {
        let adapter = registry.acquire(explicit)?;
        self.bind(adapter)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::InMemoryAdapter;

    fn name_prop() -> Property {
        Property::new("name", Basetype::String).required()
    }

    #[test]
    fn property_defaults() {
        let p = Property::new("x", Basetype::Int);
        assert!(p.is_indexed());
        assert!(!p.is_required());
        assert!(!p.is_repeated());
        assert!(p.default().is_none());
    }

    #[test]
    fn required_rejects_unset_and_null() {
        let p = name_prop();
        assert!(matches!(
            p.valid("Person", None),
            Err(ModelError::PropertyRequired { .. })
        ));
        assert!(matches!(
            p.valid("Person", Some(&Value::Null)),
            Err(ModelError::PropertyRequired { .. })
        ));
        assert!(p.valid("Person", Some(&Value::from("bob"))).is_ok());
    }

    #[test]
    fn repeated_checks() {
        let tags = Property::new("tags", Basetype::String).repeated();
        assert!(matches!(
            tags.valid("Post", Some(&Value::from("a"))),
            Err(ModelError::PropertyRepeated { .. })
        ));
        assert!(tags.valid("Post", Some(&Value::from(vec!["a", "b"]))).is_ok());

        let title = Property::new("title", Basetype::String);
        assert!(matches!(
            title.valid("Post", Some(&Value::from(vec!["a"]))),
            Err(ModelError::PropertyNotRepeated { .. })
        ));
    }

    #[test]
    fn basetype_mismatch_in_list() {
        let nums = Property::new("nums", Basetype::Int).repeated();
        let value = Value::List(vec![Value::from(1), Value::from("two")]);
        assert!(matches!(
            nums.valid("Series", Some(&value)),
            Err(ModelError::InvalidPropertyValue { .. })
        ));
    }

    #[test]
    fn untyped_accepts_scalars() {
        let any = Property::new("blob", Basetype::Any);
        assert!(any.valid("Thing", Some(&Value::from(3.5))).is_ok());
        assert!(any.valid("Thing", Some(&Value::from("s"))).is_ok());
    }

    #[test]
    fn duplicate_properties_are_rejected() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let result = Schema::define("Dup")
            .property(name_prop())
            .property(name_prop())
            .bind(adapter);
        assert!(matches!(result, Err(ModelError::InvalidAttribute { .. })));
    }

    #[test]
    fn key_property_name_is_reserved() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let result = Schema::define("Reserved")
            .property(Property::new("key", Basetype::String))
            .bind(adapter);
        assert!(result.is_err());
    }

    #[test]
    fn edge_schema_gains_endpoints() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let person = Schema::vertex("Person").bind(adapter).expect("bind");
        let follows = person
            .spawn_edge("Follows", &[&person], true)
            .expect("edge");
        assert!(follows.property("source").is_some());
        assert!(
            follows
                .property("target")
                .is_some_and(Property::is_repeated)
        );

        let knows = person.spawn_edge("Knows", &[&person], false).expect("edge");
        assert!(knows.property("peers").is_some_and(Property::is_repeated));
    }

    #[test]
    fn spawn_edge_requires_vertices() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let plain = Schema::define("Plain").bind(adapter).expect("bind");
        assert!(plain.spawn_edge("Bad", &[&plain], true).is_err());
    }

    #[test]
    fn from_json_rejects_unknown_items() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let person = Schema::define("Person")
            .property(name_prop())
            .bind(adapter)
            .expect("bind");
        let result = person.from_json(r#"{"name": "bob", "shoe": 9}"#);
        assert!(matches!(result, Err(ModelError::InvalidItem { .. })));
    }

    #[test]
    fn create_with_key_checks_kind() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let person = Schema::define("Person").bind(adapter).expect("bind");
        let other = Key::new("Org", "acme").expect("key");
        assert!(person.create_with_key(KeyFormat::key(other)).is_err());
    }
}
