//! # Keys
//!
//! A `Key` identifies one entity: its kind, its id, and the chain of parent
//! keys above it (its ancestry).
//!
//! ## Encoding
//!
//! Flattening walks the key schema `(parent, kind, id)` root-first. A root key
//! starts with an empty parent segment, so the joined forms look like:
//!
//! ```text
//! Key(Org, acme)                      -> ":Org:acme"
//! Key(User, bob, parent=Key(Org, acme)) -> ":Org:acme:User:bob"
//! ```
//!
//! The URL-safe form is base64 (URL-safe alphabet, no padding) of the joined
//! form. Decoding either form reproduces an equal key.
//!
//! ## Mutability
//!
//! Each schema field may be written once. After a successful adapter write the
//! key is marked persisted and any further write fails.

use crate::primitives::{KEY_SCHEMA_WIDTH, KEY_SEPARATOR};
use crate::types::ModelError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};

// =============================================================================
// KEY ID
// =============================================================================

/// The id component of a key: an allocated integer or a caller-chosen name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyId {
    Int(u64),
    Name(String),
}

impl KeyId {
    /// Decode one flattened id segment. An empty segment means "no id".
    pub fn parse(segment: &str) -> Result<Option<Self>, ModelError> {
        if segment.is_empty() {
            return Ok(None);
        }
        if segment.bytes().all(|b| b.is_ascii_digit()) {
            return segment
                .parse::<u64>()
                .map(|id| Some(Self::Int(id)))
                .map_err(|e| ModelError::InvalidKey(format!("id \"{}\": {}", segment, e)));
        }
        Self::Name(segment.to_string()).validated()
    }

    /// Check that the id survives a flatten/decode round trip.
    ///
    /// Empty names collapse to "no id".
    fn validated(self) -> Result<Option<Self>, ModelError> {
        match self {
            Self::Int(_) => Ok(Some(self)),
            Self::Name(ref name) if name.is_empty() => Ok(None),
            Self::Name(ref name) if name.contains(KEY_SEPARATOR) => Err(ModelError::InvalidKey(
                format!("name id \"{}\" contains '{}'", name, KEY_SEPARATOR),
            )),
            Self::Name(ref name) if name.bytes().all(|b| b.is_ascii_digit()) => Err(
                ModelError::InvalidKey(format!("name id \"{}\" is all digits", name)),
            ),
            Self::Name(_) => Ok(Some(self)),
        }
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{}", id),
            Self::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<u64> for KeyId {
    fn from(id: u64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for KeyId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for KeyId {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

// =============================================================================
// KEY
// =============================================================================

/// Identifier of a single entity.
///
/// Equality, ordering and hashing consider the schema fields only
/// (`parent`, `kind`, `id`); the persisted flag is ignored.
#[derive(Debug, Clone)]
pub struct Key {
    kind: String,
    id: Option<KeyId>,
    parent: Option<Box<Key>>,
    persisted: bool,
}

impl Key {
    /// Create a complete key of `kind` with the given id.
    pub fn new(kind: impl Into<String>, id: impl Into<KeyId>) -> Result<Self, ModelError> {
        let mut key = Self::partial(kind)?;
        key.id = id.into().validated()?;
        Ok(key)
    }

    /// Create a key of `kind` without an id (to be allocated on write).
    pub fn partial(kind: impl Into<String>) -> Result<Self, ModelError> {
        let kind = kind.into();
        if kind.is_empty() || kind.contains(KEY_SEPARATOR) {
            return Err(ModelError::InvalidKey(format!("kind \"{}\"", kind)));
        }
        Ok(Self {
            kind,
            id: None,
            parent: None,
            persisted: false,
        })
    }

    /// Create a key of `kind` under this key.
    pub fn child(&self, kind: impl Into<String>, id: impl Into<KeyId>) -> Result<Self, ModelError> {
        let mut key = Self::new(kind, id)?;
        key.parent = Some(Box::new(self.detached()));
        Ok(key)
    }

    /// Builder-style parent assignment for fresh keys.
    pub fn with_parent(mut self, parent: Key) -> Result<Self, ModelError> {
        self.set_parent(parent)?;
        Ok(self)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn id(&self) -> Option<&KeyId> {
        self.id.as_ref()
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Whether the key carries an id.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.id.is_some()
    }

    /// The topmost ancestor (the key itself for roots).
    #[must_use]
    pub fn root(&self) -> &Key {
        let mut current = self;
        while let Some(parent) = current.parent.as_deref() {
            current = parent;
        }
        current
    }

    /// Keys from the root down to (and including) this key.
    #[must_use]
    pub fn ancestry(&self) -> Vec<Key> {
        let mut chain = Vec::with_capacity(self.depth());
        let mut current = Some(self);
        while let Some(key) = current {
            chain.push(key.clone());
            current = key.parent.as_deref();
        }
        chain.reverse();
        chain
    }

    /// Number of keys in the ancestry chain.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.parent.as_deref().map(Key::depth).unwrap_or(0)
    }

    /// Whether `ancestor` appears strictly above this key.
    #[must_use]
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        let mut current = self.parent.as_deref();
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = key.parent.as_deref();
        }
        false
    }

    // -------------------------------------------------------------------------
    // Guarded writes
    // -------------------------------------------------------------------------

    /// Assign the id. Fails on persisted keys and on keys that already have one.
    pub fn set_id(&mut self, id: impl Into<KeyId>) -> Result<(), ModelError> {
        self.guard_write("id", self.id.is_some())?;
        self.id = id.into().validated()?;
        Ok(())
    }

    /// Assign the parent. Fails on persisted keys and on keys that already have one.
    pub fn set_parent(&mut self, parent: Key) -> Result<(), ModelError> {
        self.guard_write("parent", self.parent.is_some())?;
        self.parent = Some(Box::new(parent.detached()));
        Ok(())
    }

    fn guard_write(&self, field: &str, already_set: bool) -> Result<(), ModelError> {
        if self.persisted {
            return Err(ModelError::PersistedKey(field.to_string()));
        }
        if already_set {
            return Err(ModelError::KeyAlreadySet(field.to_string()));
        }
        Ok(())
    }

    pub(crate) fn set_persisted(&mut self, persisted: bool) {
        self.persisted = persisted;
    }

    /// Copy of this key with the persisted flag set.
    #[must_use]
    pub(crate) fn persisted_copy(&self) -> Self {
        let mut key = self.clone();
        key.persisted = true;
        key
    }

    fn detached(&self) -> Self {
        let mut key = self.clone();
        key.persisted = false;
        key
    }

    // -------------------------------------------------------------------------
    // Encoding
    // -------------------------------------------------------------------------

    /// Flattened segments, root-first, led by an empty parent placeholder.
    #[must_use]
    pub fn flatten(&self) -> Vec<String> {
        let mut segments = match self.parent.as_deref() {
            Some(parent) => parent.flatten(),
            None => vec![String::new()],
        };
        segments.push(self.kind.clone());
        segments.push(self.id.as_ref().map(KeyId::to_string).unwrap_or_default());
        segments
    }

    /// Flattened segments joined with the key separator.
    #[must_use]
    pub fn joined(&self) -> String {
        self.flatten().join(&KEY_SEPARATOR.to_string())
    }

    /// Base64 (URL-safe alphabet) of the joined form.
    #[must_use]
    pub fn urlsafe(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.joined())
    }

    /// Rebuild a key from flattened segments.
    ///
    /// Segments beyond one schema width are peeled root-first into parent
    /// keys, two at a time, so ancestry is rebuilt without look-ahead.
    pub fn from_raw<S: AsRef<str>>(segments: &[S]) -> Result<Self, ModelError> {
        let mut parts: VecDeque<&str> = segments.iter().map(AsRef::as_ref).collect();

        if parts.len() % 2 == 1 {
            let head = parts.pop_front().unwrap_or_default();
            if !head.is_empty() {
                return Err(ModelError::KeySchemaMismatch(format!(
                    "leading segment \"{}\" is not an empty parent placeholder",
                    head
                )));
            }
        }
        if parts.is_empty() {
            return Err(ModelError::KeySchemaMismatch(format!(
                "expected at least {} segments",
                KEY_SCHEMA_WIDTH - 1
            )));
        }

        let mut current: Option<Key> = None;
        while let (Some(kind), Some(id)) = (parts.pop_front(), parts.pop_front()) {
            let mut key = Self::partial(kind)?;
            key.id = KeyId::parse(id)?;
            key.parent = current.map(Box::new);
            current = Some(key);
        }
        current.ok_or_else(|| ModelError::KeySchemaMismatch("no key segments".to_string()))
    }

    /// Rebuild a key from its joined form.
    pub fn from_joined(joined: &str) -> Result<Self, ModelError> {
        let segments: Vec<&str> = joined.split(KEY_SEPARATOR).collect();
        Self::from_raw(&segments)
    }

    /// Rebuild a key from its URL-safe form.
    pub fn from_urlsafe(encoded: &str) -> Result<Self, ModelError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|e| ModelError::InvalidKey(format!("urlsafe \"{}\": {}", encoded, e)))?;
        let joined = String::from_utf8(bytes)
            .map_err(|e| ModelError::InvalidKey(format!("urlsafe \"{}\": {}", encoded, e)))?;
        Self::from_joined(&joined)
    }

    fn schema_fields(&self) -> (Option<&Key>, &str, Option<&KeyId>) {
        (self.parent.as_deref(), &self.kind, self.id.as_ref())
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.schema_fields() == other.schema_fields()
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.schema_fields().cmp(&other.schema_fields())
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.schema_fields().hash(state);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.id.as_ref().map(KeyId::to_string).unwrap_or_default();
        match self.parent.as_deref() {
            Some(parent) => write!(f, "Key({}, {}, parent={})", self.kind, id, parent),
            None => write!(f, "Key({}, {})", self.kind, id),
        }
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.urlsafe())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_urlsafe(&encoded).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// KEY FORMATS
// =============================================================================

/// The ways a model key may be supplied at construction.
///
/// Exactly one format may be given; `resolve` rejects zero or several.
#[derive(Debug, Clone, Default)]
pub struct KeyFormat {
    pub key: Option<Key>,
    pub raw: Option<Vec<String>>,
    pub urlsafe: Option<String>,
}

impl KeyFormat {
    #[must_use]
    pub fn key(key: Key) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn raw(segments: Vec<String>) -> Self {
        Self {
            raw: Some(segments),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn urlsafe(encoded: impl Into<String>) -> Self {
        Self {
            urlsafe: Some(encoded.into()),
            ..Self::default()
        }
    }

    /// Produce the single key this format describes.
    pub fn resolve(self) -> Result<Key, ModelError> {
        let mut given = Vec::new();
        if self.key.is_some() {
            given.push("key");
        }
        if self.raw.is_some() {
            given.push("raw");
        }
        if self.urlsafe.is_some() {
            given.push("urlsafe");
        }
        if given.len() > 1 {
            return Err(ModelError::MultipleKeyFormats(given.join(", ")));
        }

        match (self.key, self.raw, self.urlsafe) {
            (Some(key), _, _) => Ok(key),
            (_, Some(raw), _) => Key::from_raw(&raw),
            (_, _, Some(encoded)) => Key::from_urlsafe(&encoded),
            _ => Err(ModelError::UndefinedKey(
                "no key value or format provided".to_string(),
            )),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
