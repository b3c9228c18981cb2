//! # Model Instances
//!
//! A [`Model`] is one entity of a [`Schema`]: a key plus a slot per property
//! that has been assigned. Slots carry a dirty flag that is cleared when the
//! adapter confirms a write.
//!
//! ## Read Modes
//!
//! - [`Model::get_with_default`] is the implicit read: an unset property
//!   yields its declared default, or `Value::Null`.
//! - [`Model::get_raw`] is the explicit read: an unset property yields
//!   `None`, so callers can tell "never set" from "set to null".
//!
//! Assignment never validates. Validation runs in [`Model::validate`], which
//! adapters call before every write.

use crate::graph;
use crate::key::Key;
use crate::schema::{KEY_PROPERTY, Schema};
use crate::types::{ModelError, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Stored form of an entity: set property values by name.
pub type EntityData = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    data: Value,
    dirty: bool,
}

// =============================================================================
// MODEL
// =============================================================================

/// One entity of a schema.
#[derive(Clone)]
pub struct Model {
    schema: Arc<Schema>,
    key: Key,
    slots: BTreeMap<String, Slot>,
}

impl Model {
    pub(crate) fn new(schema: Arc<Schema>, key: Key) -> Self {
        Self {
            schema,
            key,
            slots: BTreeMap::new(),
        }
    }

    /// Rebuild a clean (non-dirty) instance from stored data.
    ///
    /// Stored values for properties the schema no longer declares are dropped.
    pub(crate) fn from_stored(schema: Arc<Schema>, key: Key, data: EntityData) -> Self {
        let mut slots = BTreeMap::new();
        for (name, data) in data {
            if schema.property(&name).is_none() {
                tracing::debug!(kind = schema.kind(), property = %name, "dropping undeclared stored value");
                continue;
            }
            slots.insert(name, Slot { data, dirty: false });
        }
        Self { schema, key, slots }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        self.schema.kind()
    }

    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.key.is_persisted()
    }

    /// Replace the instance key.
    ///
    /// Only an id-less key may be replaced, and only by a key of the same kind.
    pub fn set_key(&mut self, key: Key) -> Result<(), ModelError> {
        if self.key.is_complete() {
            return Err(ModelError::MultipleKeyValues(format!(
                "model already has key {}",
                self.key
            )));
        }
        if key.kind() != self.kind() {
            return Err(ModelError::InvalidKey(format!(
                "key of kind \"{}\" assigned to model \"{}\"",
                key.kind(),
                self.kind()
            )));
        }
        self.key = key;
        Ok(())
    }

    /// Place this unsaved instance under `parent`.
    pub fn set_parent(&mut self, parent: Key) -> Result<(), ModelError> {
        self.key.set_parent(parent)
    }

    // -------------------------------------------------------------------------
    // Property access
    // -------------------------------------------------------------------------

    /// Explicit read: `None` when the property was never set.
    pub fn get_raw(&self, name: &str) -> Result<Option<&Value>, ModelError> {
        self.check_declared(name, "get")?;
        Ok(self.slots.get(name).map(|slot| &slot.data))
    }

    /// Implicit read: the value, else the declared default, else `Null`.
    pub fn get_with_default(&self, name: &str) -> Result<Value, ModelError> {
        if let Some(value) = self.get_raw(name)? {
            return Ok(value.clone());
        }
        Ok(self
            .schema
            .property(name)
            .and_then(|p| p.default())
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Assign a property value. Marks the property dirty.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ModelError> {
        self.check_declared(name, "set")?;
        self.slots.insert(
            name.to_string(),
            Slot {
                data: value.into(),
                dirty: true,
            },
        );
        Ok(())
    }

    /// Return a property to the unset state.
    pub fn unset(&mut self, name: &str) -> Result<Option<Value>, ModelError> {
        self.check_declared(name, "delete")?;
        Ok(self.slots.remove(name).map(|slot| slot.data))
    }

    /// Whether a property was assigned since the last write.
    pub fn is_dirty(&self, name: &str) -> Result<bool, ModelError> {
        self.check_declared(name, "get")?;
        Ok(self.slots.get(name).is_some_and(|slot| slot.dirty))
    }

    /// Whether any property was assigned since the last write.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.slots.values().any(|slot| slot.dirty)
    }

    /// Assign several properties from a JSON object.
    pub fn update(
        &mut self,
        values: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), ModelError> {
        for (name, json) in values {
            let property = self
                .schema
                .property(name)
                .ok_or_else(|| ModelError::InvalidItem {
                    op: "update",
                    name: name.clone(),
                    kind: self.kind().to_string(),
                })?;
            let value = Value::from_json(json, property.basetype())?;
            self.set(name, value)?;
        }
        Ok(())
    }

    fn check_declared(&self, name: &str, op: &'static str) -> Result<(), ModelError> {
        if self.schema.property(name).is_none() {
            return Err(ModelError::InvalidAttribute {
                op,
                name: name.to_string(),
                kind: self.kind().to_string(),
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Validation and storage
    // -------------------------------------------------------------------------

    /// Check every declared property, then edge endpoints.
    pub fn validate(&self) -> Result<(), ModelError> {
        for property in self.schema.properties() {
            let raw = self.slots.get(property.name()).map(|slot| &slot.data);
            property.valid(self.kind(), raw)?;
        }
        graph::validate_edge(&self.schema, self)
    }

    /// Values as they are handed to adapters (set properties only).
    #[must_use]
    pub fn stored(&self) -> EntityData {
        self.slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.data.clone()))
            .collect()
    }

    /// Adopt the key returned by a successful write and clear dirty flags.
    pub(crate) fn mark_persisted(&mut self, key: Key) {
        let mut key = key;
        key.set_persisted(true);
        self.key = key;
        for slot in self.slots.values_mut() {
            slot.dirty = false;
        }
    }

    /// Validate and store this instance through its schema's adapter.
    ///
    /// Allocates an id first when the key has none.
    pub fn put(&mut self) -> Result<Key, ModelError> {
        let adapter = Arc::clone(self.schema.adapter());
        adapter.put_model(self)
    }

    /// Remove this instance and its indexes.
    pub fn delete(&self) -> Result<bool, ModelError> {
        if !self.key.is_complete() {
            return Err(ModelError::UndefinedKey(format!(
                "cannot delete unsaved {} instance",
                self.kind()
            )));
        }
        self.schema.adapter().delete_model(&self.key)
    }

    // -------------------------------------------------------------------------
    // Projection
    // -------------------------------------------------------------------------

    /// Project properties into a JSON object, in declaration order.
    #[must_use]
    pub fn to_dict(&self, options: &DictOptions<'_>) -> serde_json::Map<String, serde_json::Value> {
        let mut dict = serde_json::Map::new();
        if options.with_key && self.key.is_complete() {
            dict.insert(
                KEY_PROPERTY.to_string(),
                serde_json::Value::String(self.key.urlsafe()),
            );
        }

        for property in self.schema.properties() {
            let name = property.name();
            let raw = self.slots.get(name).map(|slot| &slot.data);
            let requested = options.include.iter().any(|n| *n == name);

            let value = match (raw, property.default()) {
                (Some(value), _) => value.clone(),
                (None, Some(default)) if !options.explicit => default.clone(),
                (None, _) => {
                    if !(options.all || options.explicit || requested) {
                        continue;
                    }
                    Value::Null
                }
            };

            let (name, value) = match options.map {
                Some(map) => map(name.to_string(), value),
                None => (name.to_string(), value),
            };
            if let Some(filter) = options.filter
                && !filter(name.as_str(), &value)
            {
                continue;
            }
            if options.exclude.iter().any(|n| *n == name) {
                continue;
            }
            if !options.include.is_empty() && !options.include.iter().any(|n| *n == name) {
                continue;
            }
            dict.insert(name, value.to_json());
        }
        dict
    }

    /// JSON text of [`Model::to_dict`] with default options.
    pub fn to_json(&self) -> Result<String, ModelError> {
        serde_json::to_string(&self.to_dict(&DictOptions::default()))
            .map_err(|e| ModelError::SerializationError(e.to_string()))
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("kind", &self.kind())
            .field("key", &self.key)
            .field("values", &self.stored())
            .finish()
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.key == other.key && self.stored() == other.stored()
    }
}

// =============================================================================
// DICT OPTIONS
// =============================================================================

/// Controls for [`Model::to_dict`].
///
/// `map` runs first, then `filter`, then the `exclude`/`include` lists (which
/// see mapped names). A non-empty `include` also pulls in unset properties.
#[derive(Default)]
pub struct DictOptions<'a> {
    pub exclude: Vec<&'a str>,
    pub include: Vec<&'a str>,
    pub filter: Option<&'a dyn Fn(&str, &Value) -> bool>,
    pub map: Option<&'a dyn Fn(String, Value) -> (String, Value)>,
    /// Emit unset properties as `null`.
    pub all: bool,
    /// Do not substitute defaults for unset properties.
    pub explicit: bool,
    /// Emit the URL-safe key under `key`, as `Schema::from_dict` reads it.
    /// Keys without an id are left out.
    pub with_key: bool,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::InMemoryAdapter;
    use crate::schema::Property;
    use crate::types::Basetype;

    fn person() -> Arc<Schema> {
        Schema::define("Person")
            .property(Property::new("name", Basetype::String).required())
            .property(Property::new("age", Basetype::Int).default_value(21))
            .property(Property::new("tags", Basetype::String).repeated())
            .bind(Arc::new(InMemoryAdapter::new()))
            .expect("bind")
    }

    #[test]
    fn unknown_property_is_rejected() {
        let mut m = person().create().expect("create");
        assert!(matches!(
            m.set("shoe", 9),
            Err(ModelError::InvalidAttribute { op: "set", .. })
        ));
        assert!(m.get_raw("shoe").is_err());
    }

    #[test]
    fn implicit_and_explicit_reads() {
        let m = person().create().expect("create");
        assert_eq!(m.get_with_default("age").expect("get"), Value::Int(21));
        assert_eq!(m.get_raw("age").expect("get"), None);
        assert_eq!(m.get_with_default("name").expect("get"), Value::Null);
    }

    #[test]
    fn set_to_null_is_not_unset() {
        let mut m = person().create().expect("create");
        m.set("age", Value::Null).expect("set");
        assert_eq!(m.get_raw("age").expect("get"), Some(&Value::Null));
        m.unset("age").expect("unset");
        assert_eq!(m.get_raw("age").expect("get"), None);
    }

    #[test]
    fn assignment_is_deferred_validation() {
        let mut m = person().create().expect("create");
        m.set("age", "not a number").expect("assignment succeeds");
        m.set("name", "bob").expect("set");
        assert!(matches!(
            m.validate(),
            Err(ModelError::InvalidPropertyValue { .. })
        ));
    }

    #[test]
    fn dirty_flags_track_assignment() {
        let mut m = person().create().expect("create");
        assert!(!m.has_changes());
        m.set("name", "bob").expect("set");
        assert!(m.is_dirty("name").expect("dirty"));
        assert!(!m.is_dirty("age").expect("dirty"));
    }

    #[test]
    fn put_clears_dirty_and_persists_key() {
        let mut m = person().create().expect("create");
        m.set("name", "bob").expect("set");
        let key = m.put().expect("put");
        assert!(key.is_complete());
        assert!(m.is_persisted());
        assert!(!m.has_changes());
    }

    #[test]
    fn to_dict_substitutes_defaults() {
        let mut m = person().create().expect("create");
        m.set("name", "bob").expect("set");
        let dict = m.to_dict(&DictOptions::default());
        assert_eq!(dict.get("age"), Some(&serde_json::json!(21)));
        assert!(dict.get("tags").is_none());

        let all = m.to_dict(&DictOptions {
            all: true,
            ..DictOptions::default()
        });
        assert_eq!(all.get("tags"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn to_dict_explicit_skips_defaults() {
        let mut m = person().create().expect("create");
        m.set("name", "bob").expect("set");
        let dict = m.to_dict(&DictOptions {
            explicit: true,
            ..DictOptions::default()
        });
        assert_eq!(dict.get("age"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn to_dict_include_exclude_filter_map() {
        let mut m = person().create().expect("create");
        m.set("name", "bob").expect("set");
        m.set("tags", vec!["a"]).expect("set");

        let only_name = m.to_dict(&DictOptions {
            include: vec!["name"],
            ..DictOptions::default()
        });
        assert_eq!(only_name.len(), 1);

        let no_name = m.to_dict(&DictOptions {
            exclude: vec!["name"],
            ..DictOptions::default()
        });
        assert!(!no_name.contains_key("name"));

        let not_null = |_: &str, v: &Value| !v.is_null();
        let upper = |n: String, v: Value| (n.to_uppercase(), v);
        let mapped = m.to_dict(&DictOptions {
            filter: Some(&not_null),
            map: Some(&upper),
            all: true,
            ..DictOptions::default()
        });
        assert!(mapped.contains_key("NAME"));
        assert!(mapped.contains_key("TAGS"));
    }

    #[test]
    fn json_bridge_round_trip() {
        let schema = person();
        let mut m = schema.create().expect("create");
        m.set("name", "bob").expect("set");
        m.set("age", 40).expect("set");
        let json = m.to_json().expect("json");
        let back = schema.from_json(&json).expect("from json");
        assert_eq!(back.get_raw("name").expect("get"), Some(&Value::from("bob")));
        assert_eq!(back.get_raw("age").expect("get"), Some(&Value::Int(40)));
    }

    #[test]
    fn dict_round_trip_keeps_key() {
        let schema = person();
        let mut m = schema.create().expect("create");
        m.set("name", "bob").expect("set");
        let with_key = DictOptions {
            with_key: true,
            ..DictOptions::default()
        };
        assert!(!m.to_dict(&with_key).contains_key(KEY_PROPERTY));

        let key = m.put().expect("put");
        assert!(!m.to_dict(&DictOptions::default()).contains_key(KEY_PROPERTY));
        let dict = m.to_dict(&with_key);
        assert_eq!(dict.get(KEY_PROPERTY), Some(&serde_json::json!(key.urlsafe())));

        let back = schema.from_dict(&dict).expect("from dict");
        assert_eq!(back.key(), &key);
        assert_eq!(back.get_raw("name").expect("get"), Some(&Value::from("bob")));
    }

    #[test]
    fn update_rejects_unknown_items() {
        let mut m = person().create().expect("create");
        let mut values = serde_json::Map::new();
        values.insert("nope".into(), serde_json::json!(1));
        assert!(matches!(
            m.update(&values),
            Err(ModelError::InvalidItem { op: "update", .. })
        ));
    }

    #[test]
    fn set_key_only_once() {
        let schema = person();
        let mut m = schema.create().expect("create");
        m.set_key(Key::new("Person", "bob").expect("key"))
            .expect("first key");
        assert!(matches!(
            m.set_key(Key::new("Person", "alice").expect("key")),
            Err(ModelError::MultipleKeyValues(_))
        ));
    }

    #[test]
    fn set_key_checks_kind() {
        let mut m = person().create().expect("create");
        let result = m.set_key(Key::new("Org", "acme").expect("key"));
        assert!(matches!(result, Err(ModelError::InvalidKey(_))));
    }
}
