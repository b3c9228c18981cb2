//! # Query Module
//!
//! Structured queries over one kind.
//!
//! - A [`Query`] targets a schema and collects filters, sorts and options
//! - Filters chain with `AND`/`OR`; each chained filter carries its connector
//! - Execution is delegated to the schema's indexed adapter
//!
//! ```ignore
//! let adults = person
//!     .query()
//!     .filter(Filter::ge("age", 18))
//!     .sort(Sort::asc("name"))
//!     .limit(10)
//!     .fetch()?;
//! ```

use crate::key::Key;
use crate::model::Model;
use crate::primitives::{
    KEY_SEPARATOR, PACK_EDGE_FILTER, PACK_FILTER, PACK_KEY_FILTER, PACK_OPTIONS, PACK_SORT,
};
use crate::schema::Schema;
use crate::types::{ModelError, Value};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// OPERATORS
// =============================================================================

/// Comparison between a stored value and a filter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    LessThan,
    LessThanEqualTo,
    GreaterThan,
    GreaterThanEqualTo,
    Contains,
}

impl Operator {
    #[must_use]
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanEqualTo => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanEqualTo => ">=",
            Self::Contains => "CONTAINS",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Equals => "EQUALS",
            Self::NotEquals => "NOT_EQUALS",
            Self::LessThan => "LESS_THAN",
            Self::LessThanEqualTo => "LESS_THAN_EQUAL_TO",
            Self::GreaterThan => "GREATER_THAN",
            Self::GreaterThanEqualTo => "GREATER_THAN_EQUAL_TO",
            Self::Contains => "CONTAINS",
        }
    }

    /// Whether this is one of the four ordering comparisons.
    #[must_use]
    pub fn is_inequality(&self) -> bool {
        matches!(
            self,
            Self::LessThan | Self::LessThanEqualTo | Self::GreaterThan | Self::GreaterThanEqualTo
        )
    }

    /// Apply the operator to a single (non-list) stored value.
    fn compare_scalar(&self, actual: &Value, expected: &Value) -> bool {
        let ordering = actual.partial_cmp(expected);
        match self {
            Self::Equals => values_equal(actual, expected),
            Self::NotEquals => !values_equal(actual, expected),
            Self::LessThan => ordering == Some(Ordering::Less),
            Self::LessThanEqualTo => {
                matches!(ordering, Some(Ordering::Less | Ordering::Equal))
            }
            Self::GreaterThan => ordering == Some(Ordering::Greater),
            Self::GreaterThanEqualTo => {
                matches!(ordering, Some(Ordering::Greater | Ordering::Equal))
            }
            Self::Contains => match (actual, expected) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
                _ => values_equal(actual, expected),
            },
        }
    }

    /// Apply the operator to a stored value, which may be a list.
    ///
    /// Lists match when any element matches; `NotEquals` requires that no
    /// element equals the filter value.
    #[must_use]
    pub fn compare(&self, actual: &Value, expected: &Value) -> bool {
        match actual {
            Value::List(items) if *self == Self::NotEquals => {
                !items.iter().any(|item| values_equal(item, expected))
            }
            Value::List(items) => items.iter().any(|item| self.compare_scalar(item, expected)),
            scalar => self.compare_scalar(scalar, expected),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || a.partial_cmp(b) == Some(Ordering::Equal)
}

/// Logical connector of a chained filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connector {
    And,
    Or,
}

impl Connector {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

// =============================================================================
// FILTERS
// =============================================================================

/// What a filter tests.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterTarget {
    /// A declared property value.
    Property(String),
    /// The entity's kind.
    KeyKind,
    /// The entity's ancestry.
    KeyAncestor,
    /// Edges touching a vertex. `tails`: `None` undirected, `Some(true)`
    /// outbound, `Some(false)` inbound.
    Edges { tails: Option<bool> },
    /// Vertices adjacent to a vertex, with the same `tails` convention.
    Neighbors { tails: Option<bool> },
}

impl FilterTarget {
    fn label(&self) -> &'static str {
        match self {
            Self::Property(_) => "PROPERTY",
            Self::KeyKind => "KEY_KIND",
            Self::KeyAncestor => "KEY_ANCESTOR",
            Self::Edges { .. } => "EDGES",
            Self::Neighbors { .. } => "NEIGHBORS",
        }
    }

    fn magic(&self) -> u8 {
        match self {
            Self::Property(_) => PACK_FILTER,
            Self::KeyKind | Self::KeyAncestor => PACK_KEY_FILTER,
            Self::Edges { .. } | Self::Neighbors { .. } => PACK_EDGE_FILTER,
        }
    }
}

/// One query constraint, optionally followed by a chain of sub-filters.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    target: FilterTarget,
    operator: Operator,
    value: Value,
    chain: Vec<Filter>,
    sub_operator: Option<Connector>,
}

impl Filter {
    #[must_use]
    pub fn new(property: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::with_target(FilterTarget::Property(property.into()), operator, value.into())
    }

    fn with_target(target: FilterTarget, operator: Operator, value: Value) -> Self {
        Self {
            target,
            operator,
            value,
            chain: Vec::new(),
            sub_operator: None,
        }
    }

    #[must_use]
    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(property, Operator::Equals, value)
    }

    #[must_use]
    pub fn ne(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(property, Operator::NotEquals, value)
    }

    #[must_use]
    pub fn lt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(property, Operator::LessThan, value)
    }

    #[must_use]
    pub fn le(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(property, Operator::LessThanEqualTo, value)
    }

    #[must_use]
    pub fn gt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(property, Operator::GreaterThan, value)
    }

    #[must_use]
    pub fn ge(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(property, Operator::GreaterThanEqualTo, value)
    }

    #[must_use]
    pub fn contains(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(property, Operator::Contains, value)
    }

    /// Chain `other` with a logical AND.
    #[must_use]
    pub fn and(mut self, other: Filter) -> Self {
        self.chain.push(other.with_sub_operator(Connector::And));
        self
    }

    /// Chain `other` with a logical OR.
    #[must_use]
    pub fn or(mut self, other: Filter) -> Self {
        self.chain.push(other.with_sub_operator(Connector::Or));
        self
    }

    fn with_sub_operator(mut self, connector: Connector) -> Self {
        self.sub_operator = Some(connector);
        self
    }

    #[must_use]
    pub fn target(&self) -> &FilterTarget {
        &self.target
    }

    /// Property name for property filters.
    #[must_use]
    pub fn property(&self) -> Option<&str> {
        match &self.target {
            FilterTarget::Property(name) => Some(name),
            _ => None,
        }
    }

    #[must_use]
    pub fn operator(&self) -> Operator {
        self.operator
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn chain(&self) -> &[Filter] {
        &self.chain
    }

    #[must_use]
    pub fn sub_operator(&self) -> Option<Connector> {
        self.sub_operator
    }

    /// Rewrite `Equals` on repeated properties to `Contains`, recursively.
    fn normalized(mut self, schema: &Schema) -> Self {
        if self.operator == Operator::Equals
            && let FilterTarget::Property(name) = &self.target
            && schema.property(name).is_some_and(|p| p.is_repeated())
        {
            self.operator = Operator::Contains;
        }
        self.chain = self
            .chain
            .into_iter()
            .map(|sub| sub.normalized(schema))
            .collect();
        self
    }

    /// Evaluate this filter (and its chain, left to right) against a model.
    ///
    /// Neighbour filters cannot be decided from one entity and never match.
    #[must_use]
    pub fn matches(&self, model: &Model) -> bool {
        let mut result = self.matches_head(model);
        for sub in &self.chain {
            let next = sub.matches(model);
            result = match sub.sub_operator {
                Some(Connector::Or) => result || next,
                Some(Connector::And) | None => result && next,
            };
        }
        result
    }

    fn matches_head(&self, model: &Model) -> bool {
        match &self.target {
            FilterTarget::Property(name) => model
                .get_with_default(name)
                .is_ok_and(|actual| self.operator.compare(&actual, &self.value)),
            FilterTarget::KeyKind => self.value.as_str() == Some(model.kind()),
            FilterTarget::KeyAncestor => self
                .value
                .as_key()
                .is_some_and(|ancestor| model.key().has_ancestor(ancestor)),
            FilterTarget::Edges { tails } => {
                let Some(vertex) = self.value.as_key() else {
                    return false;
                };
                let endpoint = |name: &str| {
                    model
                        .get_raw(name)
                        .ok()
                        .flatten()
                        .is_some_and(|v| Operator::Contains.compare(v, &Value::Key(vertex.clone())))
                };
                match tails {
                    None => endpoint(crate::graph::PEERS_PROPERTY),
                    Some(true) => endpoint(crate::graph::SOURCE_PROPERTY),
                    Some(false) => endpoint(crate::graph::TARGET_PROPERTY),
                }
            }
            FilterTarget::Neighbors { .. } => false,
        }
    }

    fn pack_into(&self, components: &mut Vec<String>) {
        let mut items = vec![
            self.target.magic().to_string(),
            self.target.label().to_string(),
        ];
        if let FilterTarget::Property(name) = &self.target {
            items.push(name.clone());
        }
        items.push(self.operator.label().to_string());
        if let FilterTarget::Edges { tails } | FilterTarget::Neighbors { tails } = &self.target {
            items.push(pack_tails(*tails));
        }
        items.push(pack_value(&self.value));
        if let Some(connector) = self.sub_operator {
            items.push(connector.label().to_string());
        }
        components.push(items.join(&KEY_SEPARATOR.to_string()));
        for sub in &self.chain {
            sub.pack_into(components);
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subject = match &self.target {
            FilterTarget::Property(name) => name.as_str(),
            FilterTarget::KeyKind => "Key",
            FilterTarget::KeyAncestor => "Ancestor",
            FilterTarget::Edges { .. } => "Edges",
            FilterTarget::Neighbors { .. } => "Neighbors",
        };
        match self.sub_operator {
            Some(connector) => write!(
                f,
                "Filter({} {} {} {})",
                connector.label(),
                subject,
                self.operator,
                self.value
            ),
            None => write!(f, "Filter({} {} {})", subject, self.operator, self.value),
        }
    }
}

/// Constructors for filters on entity keys.
pub struct KeyFilter;

impl KeyFilter {
    /// Match entities of `kind`.
    #[must_use]
    pub fn kind(kind: impl Into<String>) -> Filter {
        Filter::with_target(FilterTarget::KeyKind, Operator::Equals, Value::String(kind.into()))
    }

    /// Match descendants of `ancestor`.
    #[must_use]
    pub fn ancestor(ancestor: Key) -> Filter {
        Filter::with_target(FilterTarget::KeyAncestor, Operator::Equals, Value::Key(ancestor))
    }
}

/// Constructors for graph filters.
pub struct EdgeFilter;

impl EdgeFilter {
    /// Match edges touching `vertex`.
    #[must_use]
    pub fn edges(vertex: Key, tails: Option<bool>) -> Filter {
        Filter::with_target(
            FilterTarget::Edges { tails },
            Operator::Contains,
            Value::Key(vertex),
        )
    }

    /// Match vertices adjacent to `vertex`.
    #[must_use]
    pub fn neighbors(vertex: Key, tails: Option<bool>) -> Filter {
        Filter::with_target(
            FilterTarget::Neighbors { tails },
            Operator::Contains,
            Value::Key(vertex),
        )
    }
}

// =============================================================================
// SORTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Order results by one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    property: String,
    direction: Direction,
}

impl Sort {
    #[must_use]
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Ascending,
        }
    }

    #[must_use]
    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Descending,
        }
    }

    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn pack(&self) -> String {
        let direction = match self.direction {
            Direction::Ascending => "ASCENDING",
            Direction::Descending => "DESCENDING",
        };
        [
            PACK_SORT.to_string(),
            "PROPERTY".to_string(),
            direction.to_string(),
            self.property.clone(),
        ]
        .join(&KEY_SEPARATOR.to_string())
    }
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Re-usable query options.
///
/// The fields are the explicit view: `None` means "not set". The accessor
/// methods are the implicit view and substitute defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub keys_only: Option<bool>,
    pub ancestor: Option<Key>,
    pub limit: Option<i64>,
    pub offset: Option<u64>,
    pub projection: Option<Vec<String>>,
    pub hint: Option<String>,
    pub plan: Option<String>,
    pub cursor: Option<String>,
}

impl QueryOptions {
    pub const DEFAULT_LIMIT: i64 = -1;

    #[must_use]
    pub fn keys_only(&self) -> bool {
        self.keys_only.unwrap_or(false)
    }

    #[must_use]
    pub fn ancestor(&self) -> Option<&Key> {
        self.ancestor.as_ref()
    }

    /// Raw limit; zero or negative means unlimited.
    #[must_use]
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }

    /// Limit as a result count, `None` when unlimited.
    #[must_use]
    pub fn max_results(&self) -> Option<usize> {
        usize::try_from(self.limit()).ok().filter(|n| *n > 0)
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0)
    }

    #[must_use]
    pub fn projection(&self) -> Option<&[String]> {
        self.projection.as_deref()
    }

    #[must_use]
    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Merge the set fields of `other` into this set of options.
    ///
    /// Without `override_set`, fields already set here are kept.
    pub fn overlay(&mut self, other: &QueryOptions, override_set: bool) -> &mut Self {
        fn merge<T: Clone>(mine: &mut Option<T>, theirs: &Option<T>, override_set: bool) {
            if let Some(value) = theirs
                && (mine.is_none() || override_set)
            {
                *mine = Some(value.clone());
            }
        }
        merge(&mut self.keys_only, &other.keys_only, override_set);
        merge(&mut self.ancestor, &other.ancestor, override_set);
        merge(&mut self.limit, &other.limit, override_set);
        merge(&mut self.offset, &other.offset, override_set);
        merge(&mut self.projection, &other.projection, override_set);
        merge(&mut self.hint, &other.hint, override_set);
        merge(&mut self.plan, &other.plan, override_set);
        merge(&mut self.cursor, &other.cursor, override_set);
        self
    }

    fn pack_items(&self) -> String {
        let or_empty = |value: Option<&str>| value.unwrap_or_default().to_string();
        // Sorted by option name.
        [
            PACK_OPTIONS.to_string(),
            self.ancestor().map(Key::urlsafe).unwrap_or_default(),
            or_empty(self.cursor()),
            or_empty(self.hint.as_deref()),
            u8::from(self.keys_only()).to_string(),
            self.limit().to_string(),
            self.offset().to_string(),
            or_empty(self.plan()),
            self.projection().map(|p| p.join("+")).unwrap_or_default(),
        ]
        .join(&KEY_SEPARATOR.to_string())
    }

    /// Canonical base64 string describing these options.
    #[must_use]
    pub fn pack(&self) -> String {
        STANDARD.encode(self.pack_items())
    }
}

fn pack_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Key(key) => key.urlsafe(),
        other => other.to_json().to_string(),
    }
}

fn pack_tails(tails: Option<bool>) -> String {
    tails.map(|t| u8::from(t).to_string()).unwrap_or_default()
}

// =============================================================================
// QUERY
// =============================================================================

/// Results of one query execution.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Keys(Vec<Key>),
    Models(Vec<Model>),
}

impl QueryResult {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Keys(keys) => keys.len(),
            Self::Models(models) => models.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of every result, in result order.
    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        match self {
            Self::Keys(keys) => keys.clone(),
            Self::Models(models) => models.iter().map(|m| m.key().clone()).collect(),
        }
    }

    /// Result models; empty for keys-only results.
    #[must_use]
    pub fn into_models(self) -> Vec<Model> {
        match self {
            Self::Keys(_) => Vec::new(),
            Self::Models(models) => models,
        }
    }
}

/// A query over one kind.
#[derive(Debug, Clone)]
pub struct Query {
    schema: Option<Arc<Schema>>,
    filters: Vec<Filter>,
    sorts: Vec<Sort>,
    options: QueryOptions,
}

impl Query {
    #[must_use]
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self {
            schema: Some(Arc::clone(schema)),
            filters: Vec::new(),
            sorts: Vec::new(),
            options: QueryOptions::default(),
        }
    }

    /// A query without a kind. Such queries can be built and packed, but
    /// not executed.
    #[must_use]
    pub fn kindless() -> Self {
        Self {
            schema: None,
            filters: Vec::new(),
            sorts: Vec::new(),
            options: QueryOptions::default(),
        }
    }

    #[must_use]
    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.schema.as_deref().map(Schema::kind)
    }

    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    #[must_use]
    pub fn sorts(&self) -> &[Sort] {
        &self.sorts
    }

    #[must_use]
    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Append a filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        let filter = match self.schema.as_deref() {
            Some(schema) => filter.normalized(schema),
            None => filter,
        };
        self.filters.push(filter);
        self
    }

    /// Append a sort; earlier sorts take precedence.
    #[must_use]
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    #[must_use]
    pub fn keys_only(mut self, keys_only: bool) -> Self {
        self.options.keys_only = Some(keys_only);
        self
    }

    #[must_use]
    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.options.ancestor = Some(ancestor);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.options.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Planner hints are not supported.
    pub fn hint(self, directive: &str) -> Result<Self, ModelError> {
        Err(ModelError::Unsupported(format!(
            "query hint \"{}\"",
            directive
        )))
    }

    /// Execute with the query's own options.
    pub fn fetch(&self) -> Result<QueryResult, ModelError> {
        self.fetch_with(&QueryOptions::default())
    }

    /// Execute with `options` laid over the query's own options.
    pub fn fetch_with(&self, options: &QueryOptions) -> Result<QueryResult, ModelError> {
        let schema = self
            .schema
            .as_ref()
            .ok_or_else(|| ModelError::Unsupported("kindless queries".to_string()))?;

        let mut merged = self.options.clone();
        merged.overlay(options, true);
        if merged.projection().is_some() {
            return Err(ModelError::Unsupported("projection queries".to_string()));
        }

        let adapter = schema.adapter();
        let indexed = adapter.as_indexed().ok_or_else(|| {
            ModelError::Unsupported(format!("adapter \"{}\" cannot run queries", adapter.name()))
        })?;
        tracing::debug!(kind = schema.kind(), query = %self, "executing query");
        indexed.run_query(schema, self, &merged)
    }

    /// First matching model, if any.
    pub fn get(&self) -> Result<Option<Model>, ModelError> {
        let options = QueryOptions {
            keys_only: Some(false),
            limit: Some(1),
            ..QueryOptions::default()
        };
        Ok(self.fetch_with(&options)?.into_models().into_iter().next())
    }

    /// First matching key, if any.
    pub fn get_key(&self) -> Result<Option<Key>, ModelError> {
        let options = QueryOptions {
            keys_only: Some(true),
            limit: Some(1),
            ..QueryOptions::default()
        };
        Ok(self.fetch_with(&options)?.keys().into_iter().next())
    }

    /// Paged fetching is not supported.
    pub fn fetch_page(&self, _options: &QueryOptions) -> Result<QueryResult, ModelError> {
        Err(ModelError::Unsupported("paged queries".to_string()))
    }

    /// Canonical base64 string describing this query.
    #[must_use]
    pub fn pack(&self) -> String {
        let mut components = vec![self.options.pack_items()];
        for filter in &self.filters {
            filter.pack_into(&mut components);
        }
        components.extend(self.sorts.iter().map(Sort::pack));
        STANDARD.encode(components.join(","))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filters: Vec<String> = self.filters.iter().map(Filter::to_string).collect();
        let sorts: Vec<String> = self
            .sorts
            .iter()
            .map(|s| match s.direction {
                Direction::Ascending => format!("+{}", s.property),
                Direction::Descending => format!("-{}", s.property),
            })
            .collect();
        write!(
            f,
            "Query({}, filters=[{}], sorts=[{}])",
            self.kind().unwrap_or("*"),
            filters.join(", "),
            sorts.join(", ")
        )
    }
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

    fn post() -> Arc<Schema> {
        Schema::define("Post")
            .property(Property::new("title", Basetype::String))
            .property(Property::new("score", Basetype::Int))
            .property(Property::new("tags", Basetype::String).repeated())
            .bind(Arc::new(InMemoryAdapter::new()))
            .expect("bind")
    }

    fn model(schema: &Arc<Schema>, title: &str, score: i64) -> Model {
        let mut m = schema.create().expect("create");
        m.set("title", title).expect("set");
        m.set("score", score).expect("set");
        m.set("tags", vec!["rust", "db"]).expect("set");
        m
    }

    #[test]
    fn operators_compare_scalars() {
        let five = Value::from(5);
        assert!(Operator::Equals.compare(&five, &Value::from(5)));
        assert!(Operator::Equals.compare(&five, &Value::from(5.0)));
        assert!(Operator::LessThan.compare(&five, &Value::from(6)));
        assert!(Operator::GreaterThanEqualTo.compare(&five, &Value::from(5)));
        assert!(!Operator::GreaterThan.compare(&five, &Value::from(5)));
        assert!(Operator::NotEquals.compare(&five, &Value::from(4)));
    }

    #[test]
    fn operators_on_lists() {
        let tags = Value::from(vec!["a", "b"]);
        assert!(Operator::Contains.compare(&tags, &Value::from("a")));
        assert!(!Operator::Contains.compare(&tags, &Value::from("c")));
        assert!(!Operator::NotEquals.compare(&tags, &Value::from("a")));
    }

    #[test]
    fn repeated_equals_becomes_contains() {
        let schema = post();
        let query = schema.query().filter(Filter::eq("tags", "rust"));
        assert_eq!(query.filters()[0].operator(), Operator::Contains);
        let query = schema.query().filter(Filter::eq("title", "x"));
        assert_eq!(query.filters()[0].operator(), Operator::Equals);
    }

    #[test]
    fn chained_filters_fold_left() {
        let schema = post();
        let m = model(&schema, "hello", 10);
        let hit = Filter::eq("title", "nope").or(Filter::gt("score", 5));
        assert!(hit.matches(&m));
        let miss = Filter::eq("title", "hello").and(Filter::lt("score", 5));
        assert!(!miss.matches(&m));
        assert_eq!(miss.chain()[0].sub_operator(), Some(Connector::And));
    }

    #[test]
    fn key_filters_match_models() {
        let schema = post();
        let m = model(&schema, "hello", 1);
        assert!(KeyFilter::kind("Post").matches(&m));
        assert!(!KeyFilter::kind("User").matches(&m));
    }

    #[test]
    fn options_defaults_and_limits() {
        let options = QueryOptions::default();
        assert!(!options.keys_only());
        assert_eq!(options.limit(), -1);
        assert_eq!(options.max_results(), None);
        assert_eq!(options.offset(), 0);

        let zero = QueryOptions {
            limit: Some(0),
            ..QueryOptions::default()
        };
        assert_eq!(zero.max_results(), None);
    }

    #[test]
    fn overlay_respects_override() {
        let mut base = QueryOptions {
            limit: Some(5),
            ..QueryOptions::default()
        };
        let other = QueryOptions {
            limit: Some(10),
            keys_only: Some(true),
            ..QueryOptions::default()
        };
        base.overlay(&other, false);
        assert_eq!(base.limit(), 5);
        assert!(base.keys_only());
        base.overlay(&other, true);
        assert_eq!(base.limit(), 10);
    }

    #[test]
    fn options_pack_is_sorted_and_defaulted() {
        let packed = QueryOptions::default().pack();
        let decoded = String::from_utf8(STANDARD.decode(packed).expect("base64")).expect("utf8");
        assert_eq!(decoded, "0::::0:-1:0::");
    }

    #[test]
    fn query_pack_lists_components() {
        let schema = post();
        let query = schema
            .query()
            .filter(Filter::eq("title", "x"))
            .sort(Sort::desc("score"));
        let decoded =
            String::from_utf8(STANDARD.decode(query.pack()).expect("base64")).expect("utf8");
        let components: Vec<&str> = decoded.split(',').collect();
        assert_eq!(components.len(), 3);
        assert_eq!(components[1], "2:PROPERTY:title:EQUALS:x");
        assert_eq!(components[2], "5:PROPERTY:DESCENDING:score");
    }

    #[test]
    fn unsupported_shapes() {
        assert!(matches!(
            Query::kindless().fetch(),
            Err(ModelError::Unsupported(_))
        ));
        let schema = post();
        assert!(schema.query().hint("index").is_err());
        assert!(schema.query().fetch_page(&QueryOptions::default()).is_err());
        let projection = QueryOptions {
            projection: Some(vec!["title".into()]),
            ..QueryOptions::default()
        };
        assert!(matches!(
            schema.query().fetch_with(&projection),
            Err(ModelError::Unsupported(_))
        ));
    }

    #[test]
    fn display_is_readable() {
        let schema = post();
        let query = schema
            .query()
            .filter(Filter::ge("score", 3))
            .sort(Sort::asc("title"));
        assert_eq!(
            query.to_string(),
            "Query(Post, filters=[Filter(score >= 3)], sorts=[+title])"
        );
    }
}
