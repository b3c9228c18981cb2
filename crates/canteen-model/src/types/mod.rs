//! # Core Type Definitions
//!
//! This module contains the value vocabulary shared by every other module:
//! - Property values (`Value`) and their declared types (`Basetype`)
//! - Ordered index scores (`Score`)
//! - Error types (`ModelError`)
//!
//! ## Ordering Guarantees
//!
//! `Score` implements a total order (including floats) so it can be used as a
//! `BTreeMap`/`BTreeSet` key. Converting a value into a score never performs
//! floating-point arithmetic, only casts.

use crate::key::Key;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

// =============================================================================
// VALUE
// =============================================================================

/// A single property value held by a model.
///
/// `List` is only valid for repeated properties; `Json` carries free-form
/// structured data for `Basetype::Json` properties.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Key(Key),
    List(Vec<Value>),
    Json(serde_json::Value),
}

impl Value {
    /// Short human-readable name of the value's runtime type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime(_) => "datetime",
            Self::Key(_) => "key",
            Self::List(_) => "list",
            Self::Json(_) => "json",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Self::Key(k) => Some(k),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Sortable score for numeric and temporal values.
    ///
    /// Dates and datetimes are scored as millisecond UTC timestamps. Booleans,
    /// times and everything else have no score and are indexed as sets.
    #[must_use]
    pub fn score(&self) -> Option<Score> {
        match self {
            Self::Int(i) => Some(Score::new(*i as f64)),
            Self::Float(f) => Some(Score::new(*f)),
            Self::Date(d) => Some(Score::new(
                d.and_time(NaiveTime::MIN).and_utc().timestamp_millis() as f64,
            )),
            Self::DateTime(dt) => Some(Score::new(dt.and_utc().timestamp_millis() as f64)),
            _ => None,
        }
    }

    /// Whether values sharing this value's score are all equal to it.
    ///
    /// Integers at or beyond 2^53 round onto shared `f64` scores, so index
    /// lookups on them need the stored value checked again.
    #[must_use]
    pub fn has_exact_score(&self) -> bool {
        match self {
            Self::Int(i) => i.unsigned_abs() < EXACT_SCORE_LIMIT,
            _ => true,
        }
    }

    /// Project this value into JSON.
    ///
    /// Keys become their URL-safe encoding; temporal values become ISO strings.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Float(f) => Json::from(*f),
            Self::String(s) => Json::String(s.clone()),
            Self::Date(d) => Json::String(d.format(DATE_FORMAT).to_string()),
            Self::Time(t) => Json::String(t.format(TIME_FORMAT).to_string()),
            Self::DateTime(dt) => Json::String(dt.format(DATETIME_FORMAT).to_string()),
            Self::Key(k) => Json::String(k.urlsafe()),
            Self::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Self::Json(v) => v.clone(),
        }
    }

    /// Rebuild a value from JSON, guided by the declared basetype.
    ///
    /// Arrays are decoded element-wise; `null` always decodes to `Value::Null`.
    pub fn from_json(json: &serde_json::Value, basetype: &Basetype) -> Result<Self, ModelError> {
        use serde_json::Value as Json;

        if json.is_null() {
            return Ok(Self::Null);
        }
        if let Json::Array(items) = json
            && !matches!(basetype, Basetype::Json)
        {
            return items
                .iter()
                .map(|item| Self::from_json(item, basetype))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List);
        }

        let mismatch = || {
            ModelError::DeserializationError(format!(
                "cannot decode {} as {}",
                json,
                basetype.name()
            ))
        };

        match basetype {
            Basetype::Any => Ok(match json {
                Json::Bool(b) => Self::Bool(*b),
                Json::Number(n) => match n.as_i64() {
                    Some(i) => Self::Int(i),
                    None => Self::Float(n.as_f64().ok_or_else(mismatch)?),
                },
                Json::String(s) => Self::String(s.clone()),
                other => Self::Json(other.clone()),
            }),
            Basetype::Bool => json.as_bool().map(Self::Bool).ok_or_else(mismatch),
            Basetype::Int => json.as_i64().map(Self::Int).ok_or_else(mismatch),
            Basetype::Float => json.as_f64().map(Self::Float).ok_or_else(mismatch),
            Basetype::String => json
                .as_str()
                .map(|s| Self::String(s.to_string()))
                .ok_or_else(mismatch),
            Basetype::Date => json
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
                .map(Self::Date)
                .ok_or_else(mismatch),
            Basetype::Time => json
                .as_str()
                .and_then(|s| s.parse::<NaiveTime>().ok())
                .map(Self::Time)
                .ok_or_else(mismatch),
            Basetype::DateTime => json
                .as_str()
                .and_then(|s| s.parse::<NaiveDateTime>().ok())
                .map(Self::DateTime)
                .ok_or_else(mismatch),
            Basetype::Key => {
                let encoded = json.as_str().ok_or_else(mismatch)?;
                Key::from_urlsafe(encoded).map(Self::Key)
            }
            Basetype::Json => Ok(Self::Json(json.clone())),
            Basetype::OneOf(options) => options
                .iter()
                .find_map(|option| Self::from_json(json, option).ok())
                .ok_or_else(mismatch),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Bool(a), Self::Bool(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Int(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::String(a), Self::String(b)) => a.partial_cmp(b),
            (Self::Date(a), Self::Date(b)) => a.partial_cmp(b),
            (Self::Time(a), Self::Time(b)) => a.partial_cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.partial_cmp(b),
            (Self::Key(a), Self::Key(b)) => a.partial_cmp(b),
            (Self::List(a), Self::List(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Key(k) => write!(f, "{}", k),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl From<NaiveTime> for Value {
    fn from(t: NaiveTime) -> Self {
        Self::Time(t)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Self::DateTime(dt)
    }
}

impl From<Key> for Value {
    fn from(k: Key) -> Self {
        Self::Key(k)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Self::Null)
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

// =============================================================================
// BASETYPE
// =============================================================================

/// Declared type of a property.
///
/// `Any` accepts every scalar (the untyped property). `OneOf` accepts a value
/// matching any of its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Basetype {
    #[default]
    Any,
    Bool,
    Int,
    Float,
    String,
    Date,
    Time,
    DateTime,
    Key,
    Json,
    OneOf(Vec<Basetype>),
}

impl Basetype {
    /// Whether a single (non-list) value is an instance of this basetype.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Any, Value::List(_)) => false,
            (Self::Any, _) => true,
            (Self::Bool, Value::Bool(_))
            | (Self::Int, Value::Int(_))
            | (Self::Float, Value::Float(_))
            | (Self::String, Value::String(_))
            | (Self::Date, Value::Date(_))
            | (Self::Time, Value::Time(_))
            | (Self::DateTime, Value::DateTime(_))
            | (Self::Key, Value::Key(_))
            | (Self::Json, Value::Json(_)) => true,
            (Self::OneOf(options), v) => options.iter().any(|o| o.accepts(v)),
            _ => false,
        }
    }

    /// Whether values of this type live in sorted (range-queryable) indexes.
    #[must_use]
    pub fn is_sortable(&self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Date | Self::DateTime)
    }

    /// Whether values of this type compare as strings.
    #[must_use]
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::String)
    }

    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Any => "any".to_string(),
            Self::Bool => "bool".to_string(),
            Self::Int => "int".to_string(),
            Self::Float => "float".to_string(),
            Self::String => "string".to_string(),
            Self::Date => "date".to_string(),
            Self::Time => "time".to_string(),
            Self::DateTime => "datetime".to_string(),
            Self::Key => "key".to_string(),
            Self::Json => "json".to_string(),
            Self::OneOf(options) => {
                let names: Vec<String> = options.iter().map(Basetype::name).collect();
                format!("({})", names.join(" | "))
            }
        }
    }
}

// =============================================================================
// SCORE
// =============================================================================

/// Integer magnitude from which distinct integers can share a score.
const EXACT_SCORE_LIMIT: u64 = 1 << 53;

/// Totally ordered score for sorted indexes.
///
/// Ordering follows `f64::total_cmp`, with `-0.0` normalised to `0.0` so that
/// equal numbers always land on the same score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Score(f64);

impl Score {
    #[must_use]
    pub fn new(value: f64) -> Self {
        if value == 0.0 { Self(0.0) } else { Self(value) }
    }

    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Order-preserving mapping onto `u64`, used by byte-ordered backends.
    #[must_use]
    pub fn to_ordered_bits(self) -> u64 {
        let bits = self.0.to_bits();
        if bits >> 63 == 1 {
            !bits
        } else {
            bits | (1 << 63)
        }
    }

    /// Inverse of [`Score::to_ordered_bits`].
    #[must_use]
    pub fn from_ordered_bits(bits: u64) -> Self {
        let raw = if bits >> 63 == 1 {
            bits & !(1 << 63)
        } else {
            !bits
        };
        Self(f64::from_bits(raw))
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::hash::Hash for Score {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the model layer.
///
/// - Key and validation errors are never swallowed; they reach the caller
/// - Backend failures are wrapped into `StorageError` at the boundary
/// - Use `Result<T, ModelError>` for fallible operations
#[derive(Debug, Error)]
pub enum ModelError {
    /// An abstract type was used where a concrete one is required.
    #[error("Cannot directly instantiate abstract type `{0}`")]
    AbstractConstruction(String),

    /// No adapter is registered at all.
    #[error("No valid model adapters found")]
    NoSupportedAdapters,

    /// The explicitly requested adapter is not registered.
    #[error("Requested model adapter \"{0}\" could not be found")]
    InvalidExplicitAdapter(String),

    /// The adapter does not implement the requested operation.
    #[error("Operation `{0}` is not implemented by this adapter")]
    NotImplemented(String),

    /// A key component has an unusable value.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The operation needs a key, but none was given or derivable.
    #[error("Could not operate on undefined key: {0}")]
    UndefinedKey(String),

    /// More than one key format was supplied at once.
    #[error("Cannot provide multiple key formats (got: {0})")]
    MultipleKeyFormats(String),

    /// A key value was supplied alongside another key value.
    #[error("Cannot merge multiple key values for `{0}`")]
    MultipleKeyValues(String),

    /// A write was attempted on a persisted key.
    #[error("Cannot set property \"{0}\" of an already-persisted key")]
    PersistedKey(String),

    /// A key component was already set and cannot be overwritten.
    #[error("Key property \"{0}\" is already set")]
    KeyAlreadySet(String),

    /// Raw key material does not fit the key schema.
    #[error("Key schema mismatch: {0}")]
    KeySchemaMismatch(String),

    /// Write or read of a property the schema does not declare.
    #[error("Cannot {op} nonexistent data property \"{name}\" of model \"{kind}\"")]
    InvalidAttribute {
        op: &'static str,
        name: String,
        kind: String,
    },

    /// Dictionary-style access to an undeclared item.
    #[error("Cannot {op} nonexistent data item \"{name}\" of model \"{kind}\"")]
    InvalidItem {
        op: &'static str,
        name: String,
        kind: String,
    },

    /// A required property has no value.
    #[error("Property \"{name}\" of model \"{kind}\" is required but has no value")]
    PropertyRequired { name: String, kind: String },

    /// A repeated property was given a single value.
    #[error("Property \"{name}\" of model \"{kind}\" is repeated and requires a list value")]
    PropertyRepeated { name: String, kind: String },

    /// A non-repeated property was given a list.
    #[error("Property \"{name}\" of model \"{kind}\" is not repeated and cannot accept a list")]
    PropertyNotRepeated { name: String, kind: String },

    /// A value does not match the property's basetype.
    #[error(
        "Property \"{name}\" of model \"{kind}\" cannot accept value of type \"{got}\" (expected \"{expected}\")"
    )]
    InvalidPropertyValue {
        name: String,
        kind: String,
        got: String,
        expected: String,
    },

    /// No schema is registered for this kind.
    #[error("Unknown or unregistered kind: \"{0}\"")]
    UnknownKind(String),

    /// Edge endpoints are missing or do not match the edge spec.
    #[error("Invalid edge: {0}")]
    InvalidEdge(String),

    /// The query is malformed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The query shape is explicitly unsupported.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The storage backend failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl ModelError {
    /// Whether this error is a user-facing validation failure.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::PropertyRequired { .. }
                | Self::PropertyRepeated { .. }
                | Self::PropertyNotRepeated { .. }
                | Self::InvalidPropertyValue { .. }
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
