//! # Query Planner
//!
//! Shared query execution for indexed adapters. Adapters expose their index
//! buckets through [`IndexSource`]; the planner turns a query into bucket
//! lookups, combines them, and finishes in memory.
//!
//! ## Plan
//!
//! 1. Ancestor scope resolves to the entity-group bucket of the ancestor's root.
//! 2. Unchained range and equality filters on sortable values merge per
//!    property into one score range.
//! 3. Every other filter resolves to a set bucket. Chains fold left to
//!    right: AND intersects, OR unions.
//! 4. Filters no index can answer (`!=`, inequalities on unsortable values,
//!    substring matches, integers too large for an exact score) are deferred
//!    and evaluated on fetched models.
//! 5. Candidate sets intersect smallest-first; with no constraint at all the
//!    kind bucket is the candidate set.
//! 6. Keys-only queries with nothing left to evaluate return keys directly.
//! 7. Otherwise models are fetched, deferred filters applied, then sorts,
//!    then offset, then limit.

use crate::adapter::KindRegistry;
use crate::adapter::index::{IndexName, IndexSlot, index_slot, key_slots};
use crate::config::AdapterConfig;
use crate::graph::{GraphToken, neighbor_of};
use crate::key::Key;
use crate::model::{EntityData, Model};
use crate::query::{
    Connector, Direction, Filter, FilterTarget, Operator, Query, QueryOptions, QueryResult, Sort,
};
use crate::schema::Schema;
use crate::types::{ModelError, Score, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

/// Read access to an adapter's index buckets and records.
pub(crate) trait IndexSource {
    /// Members of a set bucket (empty when the bucket does not exist).
    fn set_members(&self, name: &IndexName) -> Result<BTreeSet<String>, ModelError>;

    /// Members of a sorted bucket whose score lies within the bounds.
    ///
    /// The planner never passes an empty range.
    fn range_members(
        &self,
        name: &IndexName,
        low: Bound<Score>,
        high: Bound<Score>,
    ) -> Result<BTreeSet<String>, ModelError>;

    /// Stored records for encoded keys, aligned with the input.
    fn fetch_records(&self, encoded: &[String]) -> Result<Vec<Option<EntityData>>, ModelError>;

    fn encode(&self, key: &Key) -> String;

    fn decode(&self, encoded: &str) -> Result<Key, ModelError>;
}

// =============================================================================
// RANGES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoreRange {
    low: Bound<Score>,
    high: Bound<Score>,
}

impl ScoreRange {
    const FULL: Self = Self {
        low: Bound::Unbounded,
        high: Bound::Unbounded,
    };

    /// Range for a single comparison, or `None` for operators ranges cannot express.
    fn for_operator(operator: Operator, score: Score) -> Option<Self> {
        let (low, high) = match operator {
            Operator::Equals => (Bound::Included(score), Bound::Included(score)),
            Operator::LessThan => (Bound::Unbounded, Bound::Excluded(score)),
            Operator::LessThanEqualTo => (Bound::Unbounded, Bound::Included(score)),
            Operator::GreaterThan => (Bound::Excluded(score), Bound::Unbounded),
            Operator::GreaterThanEqualTo => (Bound::Included(score), Bound::Unbounded),
            Operator::NotEquals | Operator::Contains => return None,
        };
        Some(Self { low, high })
    }

    /// Whether no score can satisfy both bounds.
    fn is_empty(&self) -> bool {
        match (self.low, self.high) {
            (Bound::Included(low), Bound::Included(high)) => low > high,
            (
                Bound::Included(low) | Bound::Excluded(low),
                Bound::Included(high) | Bound::Excluded(high),
            ) => low >= high,
            _ => false,
        }
    }

    fn intersect(self, other: Self) -> Self {
        Self {
            low: tighter(self.low, other.low, Ordering::Greater),
            high: tighter(self.high, other.high, Ordering::Less),
        }
    }
}

/// Pick the more restrictive of two bounds. `wins` is the ordering a value
/// must have against the other to be more restrictive.
fn tighter(a: Bound<Score>, b: Bound<Score>, wins: Ordering) -> Bound<Score> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other,
        (x, y) => {
            let (vx, vy) = (bound_value(x), bound_value(y));
            match vx.cmp(&vy) {
                Ordering::Equal if matches!(x, Bound::Excluded(_)) => x,
                Ordering::Equal => y,
                ord if ord == wins => x,
                _ => y,
            }
        }
    }
}

fn bound_value(bound: Bound<Score>) -> Score {
    match bound {
        Bound::Included(s) | Bound::Excluded(s) => s,
        Bound::Unbounded => Score::new(0.0),
    }
}

// =============================================================================
// FILTER RESOLUTION
// =============================================================================

enum Resolved {
    Set(BTreeSet<String>),
    Deferred,
}

struct Planner<'a> {
    source: &'a dyn IndexSource,
    registry: &'a KindRegistry,
    schema: &'a Schema,
}

impl Planner<'_> {
    fn series(&self, property: &str, tag: u8) -> IndexName {
        IndexName::Series {
            kind: self.schema.kind().to_string(),
            property: property.to_string(),
            tag,
        }
    }

    fn resolve(&self, filter: &Filter) -> Result<Resolved, ModelError> {
        let mut current = self.resolve_head(filter)?;
        for sub in filter.chain() {
            let next = self.resolve(sub)?;
            current = match (current, next) {
                (Resolved::Set(a), Resolved::Set(b)) => match sub.sub_operator() {
                    Some(Connector::Or) => Resolved::Set(a.union(&b).cloned().collect()),
                    Some(Connector::And) | None => {
                        Resolved::Set(a.intersection(&b).cloned().collect())
                    }
                },
                _ => Resolved::Deferred,
            };
        }
        Ok(current)
    }

    fn resolve_head(&self, filter: &Filter) -> Result<Resolved, ModelError> {
        match filter.target() {
            FilterTarget::Property(name) => self.resolve_property(name, filter),
            FilterTarget::KeyKind => {
                let kind = filter.value().as_str().ok_or_else(|| {
                    ModelError::InvalidQuery("kind filter needs a kind name".to_string())
                })?;
                Ok(Resolved::Set(
                    self.source.set_members(&IndexName::Kind(kind.to_string()))?,
                ))
            }
            FilterTarget::KeyAncestor => {
                let ancestor = filter_key(filter)?;
                Ok(Resolved::Set(self.descendants(ancestor)?))
            }
            FilterTarget::Edges { tails } => {
                let token = match tails {
                    None => GraphToken::Peers,
                    Some(true) => GraphToken::Out,
                    Some(false) => GraphToken::In,
                };
                self.adjacency(filter, token, false)
            }
            FilterTarget::Neighbors { tails } => {
                let token = match tails {
                    None => GraphToken::Neighbors,
                    Some(true) => GraphToken::NeighborsOut,
                    Some(false) => GraphToken::NeighborsIn,
                };
                self.adjacency(filter, token, true)
            }
        }
    }

    fn resolve_property(&self, name: &str, filter: &Filter) -> Result<Resolved, ModelError> {
        let Some(property) = self.schema.property(name) else {
            return Err(unknown_property(self.schema, name, "filter"));
        };
        if !property.is_indexed() {
            return Ok(Resolved::Deferred);
        }
        let operator = filter.operator();
        let substring = operator == Operator::Contains
            && !property.is_repeated()
            && matches!(filter.value(), Value::String(_));
        if substring {
            return Ok(Resolved::Deferred);
        }

        match index_slot(filter.value(), self.registry) {
            Some(IndexSlot::Series { .. }) if !filter.value().has_exact_score() => {
                Ok(Resolved::Deferred)
            }
            Some(IndexSlot::Series { tag, score }) => {
                let operator = if operator == Operator::Contains {
                    Operator::Equals
                } else {
                    operator
                };
                match ScoreRange::for_operator(operator, score) {
                    Some(range) => Ok(Resolved::Set(self.source.range_members(
                        &self.series(name, tag),
                        range.low,
                        range.high,
                    )?)),
                    None => Ok(Resolved::Deferred),
                }
            }
            Some(slot @ IndexSlot::Token(_))
                if matches!(operator, Operator::Equals | Operator::Contains) =>
            {
                let slots = match filter.value() {
                    Value::Key(key) => key_slots(key),
                    _ => vec![slot],
                };
                let mut members = BTreeSet::new();
                for slot in slots {
                    let (bucket, _) = slot.into_name(self.schema.kind(), name);
                    members.extend(self.source.set_members(&bucket)?);
                }
                Ok(Resolved::Set(members))
            }
            _ => Ok(Resolved::Deferred),
        }
    }

    fn adjacency(
        &self,
        filter: &Filter,
        token: GraphToken,
        neighbors: bool,
    ) -> Result<Resolved, ModelError> {
        let vertex = filter_key(filter)?;
        let bucket = IndexName::Graph {
            vertex: self.source.encode(vertex),
            token,
        };
        let members = self.source.set_members(&bucket)?;
        if !neighbors {
            return Ok(Resolved::Set(members));
        }
        Ok(Resolved::Set(
            members
                .iter()
                .map(|member| neighbor_of(member).to_string())
                .collect(),
        ))
    }

    /// Encoded keys strictly below `ancestor`.
    fn descendants(&self, ancestor: &Key) -> Result<BTreeSet<String>, ModelError> {
        let group = IndexName::Group(Some(self.source.encode(ancestor.root())));
        let members = self.source.set_members(&group)?;
        if ancestor.parent().is_none() {
            return Ok(members);
        }
        let mut below = BTreeSet::new();
        for member in members {
            if self.source.decode(&member)?.has_ancestor(ancestor) {
                below.insert(member);
            }
        }
        Ok(below)
    }
}

fn filter_key(filter: &Filter) -> Result<&Key, ModelError> {
    filter
        .value()
        .as_key()
        .ok_or_else(|| ModelError::InvalidQuery(format!("{} needs a key value", filter)))
}

fn unknown_property(schema: &Schema, name: &str, op: &'static str) -> ModelError {
    ModelError::InvalidAttribute {
        op,
        name: name.to_string(),
        kind: schema.kind().to_string(),
    }
}

/// Whether any filter in the chain resolves to a bucket that is not kind-scoped.
fn spans_kinds(filter: &Filter) -> bool {
    !matches!(filter.target(), FilterTarget::Property(_)) || filter.chain().iter().any(spans_kinds)
}

fn has_neighbor_target(filter: &Filter) -> bool {
    matches!(filter.target(), FilterTarget::Neighbors { .. })
        || filter.chain().iter().any(has_neighbor_target)
}

/// Unchained property filter on a sortable value that merges into a range.
fn range_candidate(filter: &Filter, schema: &Schema) -> Option<(String, u8, ScoreRange)> {
    if !filter.chain().is_empty() {
        return None;
    }
    let name = filter.property()?;
    if !schema.property(name)?.is_indexed() {
        return None;
    }
    if !filter.value().has_exact_score() {
        return None;
    }
    let score = filter.value().score()?;
    let tag = match index_slot(filter.value(), &KindRegistry::default())? {
        IndexSlot::Series { tag, .. } => tag,
        IndexSlot::Token(_) => return None,
    };
    let operator = match filter.operator() {
        Operator::Contains => Operator::Equals,
        other => other,
    };
    let range = ScoreRange::for_operator(operator, score)?;
    Some((name.to_string(), tag, range))
}

// =============================================================================
// EXECUTION
// =============================================================================

/// Run `query` against an adapter's indexes.
pub(crate) fn execute(
    source: &dyn IndexSource,
    registry: &KindRegistry,
    config: &AdapterConfig,
    schema: &Arc<Schema>,
    query: &Query,
    options: &QueryOptions,
) -> Result<QueryResult, ModelError> {
    for sort in query.sorts() {
        if schema.property(sort.property()).is_none() {
            return Err(unknown_property(schema, sort.property(), "sort"));
        }
    }

    let planner = Planner {
        source,
        registry,
        schema,
    };
    let mut sets: Vec<BTreeSet<String>> = Vec::new();
    let mut deferred: Vec<&Filter> = Vec::new();
    let mut cross_kind = false;

    if let Some(ancestor) = options.ancestor() {
        sets.push(planner.descendants(ancestor)?);
        cross_kind = true;
    }

    let mut ranges: BTreeMap<(String, u8), ScoreRange> = BTreeMap::new();
    for filter in query.filters() {
        if let Some((name, tag, range)) = range_candidate(filter, schema) {
            let merged = ranges
                .get(&(name.clone(), tag))
                .copied()
                .unwrap_or(ScoreRange::FULL)
                .intersect(range);
            ranges.insert((name, tag), merged);
            continue;
        }
        match planner.resolve(filter)? {
            Resolved::Set(members) => {
                cross_kind |= spans_kinds(filter);
                sets.push(members);
            }
            Resolved::Deferred if has_neighbor_target(filter) => {
                return Err(ModelError::Unsupported(format!(
                    "neighbor filter chained with an unindexed filter: {}",
                    filter
                )));
            }
            Resolved::Deferred => deferred.push(filter),
        }
    }
    for ((name, tag), range) in ranges {
        if range.is_empty() {
            sets.push(BTreeSet::new());
            continue;
        }
        sets.push(source.range_members(&planner.series(&name, tag), range.low, range.high)?);
    }

    let kind_bucket = IndexName::Kind(schema.kind().to_string());
    if sets.is_empty() || cross_kind {
        sets.push(source.set_members(&kind_bucket)?);
    }
    let candidates = intersect_all(sets);

    tracing::trace!(
        kind = schema.kind(),
        candidates = candidates.len(),
        deferred = deferred.len(),
        "query planned"
    );

    let offset = usize::try_from(options.offset()).unwrap_or(usize::MAX);
    let limit = options.max_results();
    let in_index_order = query.sorts().is_empty() && deferred.is_empty();

    if in_index_order && options.keys_only() {
        let keys = window(candidates.into_iter(), offset, limit)
            .map(|encoded| source.decode(&encoded))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(QueryResult::Keys(keys));
    }

    let encoded: Vec<String> = if in_index_order {
        window(candidates.into_iter(), offset, limit).collect()
    } else {
        candidates.into_iter().collect()
    };

    let records = source.fetch_records(&encoded)?;
    let mut models = Vec::with_capacity(records.len());
    for (encoded, record) in encoded.iter().zip(records) {
        let Some(data) = record else {
            tracing::warn!(key = %encoded, kind = schema.kind(), "index points at a missing record");
            continue;
        };
        let key = source.decode(encoded)?.persisted_copy();
        let model = Model::from_stored(Arc::clone(schema), key, data);
        if deferred.iter().all(|filter| filter.matches(&model)) {
            models.push(model);
        }
    }

    if !in_index_order {
        sort_models(&mut models, query.sorts(), schema, config.legacy_string_sort);
        models = window(models.into_iter(), offset, limit).collect();
    }

    if options.keys_only() {
        return Ok(QueryResult::Keys(
            models.into_iter().map(|m| m.key().clone()).collect(),
        ));
    }
    Ok(QueryResult::Models(models))
}

fn window<T>(
    items: impl Iterator<Item = T>,
    offset: usize,
    limit: Option<usize>,
) -> impl Iterator<Item = T> {
    items.skip(offset).take(limit.unwrap_or(usize::MAX))
}

/// Intersect candidate sets, smallest first. A single set is used as is.
fn intersect_all(mut sets: Vec<BTreeSet<String>>) -> BTreeSet<String> {
    sets.sort_by_key(BTreeSet::len);
    let mut iter = sets.into_iter();
    let Some(mut result) = iter.next() else {
        return BTreeSet::new();
    };
    for set in iter {
        if result.is_empty() {
            break;
        }
        result.retain(|member| set.contains(member));
    }
    result
}

// =============================================================================
// SORTING
// =============================================================================

/// Stable multi-key sort. Earlier sorts are primary; nulls sort last in
/// either direction.
fn sort_models(models: &mut [Model], sorts: &[Sort], schema: &Schema, legacy_string_sort: bool) {
    if sorts.is_empty() {
        return;
    }
    let reversed: Vec<bool> = sorts
        .iter()
        .map(|sort| {
            let textual = schema
                .property(sort.property())
                .is_some_and(|p| p.basetype().is_textual());
            let descending = sort.direction() == Direction::Descending;
            descending ^ (legacy_string_sort && textual)
        })
        .collect();

    models.sort_by(|a, b| {
        for (sort, reverse) in sorts.iter().zip(&reversed) {
            let va = a.get_with_default(sort.property()).unwrap_or(Value::Null);
            let vb = b.get_with_default(sort.property()).unwrap_or(Value::Null);
            let ordering = match (va.is_null(), vb.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => {
                    let ord = va.partial_cmp(&vb).unwrap_or(Ordering::Equal);
                    if *reverse { ord.reverse() } else { ord }
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: f64) -> Score {
        Score::new(v)
    }

    #[test]
    fn complementary_filters_merge() {
        let low = ScoreRange::for_operator(Operator::GreaterThanEqualTo, s(2.0)).expect("range");
        let high = ScoreRange::for_operator(Operator::LessThan, s(5.0)).expect("range");
        let merged = low.intersect(high);
        assert_eq!(merged.low, Bound::Included(s(2.0)));
        assert_eq!(merged.high, Bound::Excluded(s(5.0)));
    }

    #[test]
    fn exclusive_wins_on_equal_bounds() {
        let a = ScoreRange::for_operator(Operator::GreaterThanEqualTo, s(3.0)).expect("range");
        let b = ScoreRange::for_operator(Operator::GreaterThan, s(3.0)).expect("range");
        assert_eq!(a.intersect(b).low, Bound::Excluded(s(3.0)));
        assert_eq!(b.intersect(a).low, Bound::Excluded(s(3.0)));
    }

    #[test]
    fn zero_bound_is_honoured() {
        let range = ScoreRange::for_operator(Operator::GreaterThan, s(0.0)).expect("range");
        assert_eq!(range.low, Bound::Excluded(s(0.0)));
    }

    #[test]
    fn disjoint_bounds_are_empty() {
        let a = ScoreRange::for_operator(Operator::GreaterThan, s(5.0)).expect("range");
        let b = ScoreRange::for_operator(Operator::LessThan, s(3.0)).expect("range");
        assert!(a.intersect(b).is_empty());
        let c = ScoreRange::for_operator(Operator::GreaterThan, s(3.0)).expect("range");
        let d = ScoreRange::for_operator(Operator::LessThanEqualTo, s(3.0)).expect("range");
        assert!(c.intersect(d).is_empty());
        let e = ScoreRange::for_operator(Operator::Equals, s(3.0)).expect("range");
        assert!(!e.is_empty());
    }

    #[test]
    fn tighter_bound_is_kept() {
        let a = ScoreRange::for_operator(Operator::LessThanEqualTo, s(10.0)).expect("range");
        let b = ScoreRange::for_operator(Operator::LessThanEqualTo, s(4.0)).expect("range");
        assert_eq!(a.intersect(b).high, Bound::Included(s(4.0)));
    }

    #[test]
    fn not_equals_has_no_range() {
        assert!(ScoreRange::for_operator(Operator::NotEquals, s(1.0)).is_none());
    }

    #[test]
    fn intersection_of_sets() {
        let a: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let b: BTreeSet<String> = ["b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let c: BTreeSet<String> = ["c"].iter().map(|s| s.to_string()).collect();
        let result = intersect_all(vec![a.clone(), b]);
        assert_eq!(result.len(), 2);
        assert_eq!(intersect_all(vec![a, c.clone()]), c);
        assert!(intersect_all(Vec::new()).is_empty());
    }

    #[test]
    fn window_applies_offset_then_limit() {
        let items: Vec<u32> = window(0..10u32, 2, Some(3)).collect();
        assert_eq!(items, vec![2, 3, 4]);
        let all: Vec<u32> = window(0..4u32, 0, None).collect();
        assert_eq!(all.len(), 4);
    }
}
