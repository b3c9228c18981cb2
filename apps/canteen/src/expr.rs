//! # Query Expressions
//!
//! Command-line filter and sort syntax.
//!
//! - Filters: `<property><op><value>` with `op` one of `==` (or `=`), `!=`,
//!   `<`, `<=`, `>`, `>=` and `~` (contains). The value is read as JSON when
//!   it parses, otherwise as a bare string, then decoded by the property's
//!   basetype.
//! - Sorts: `<property>` or `+<property>` ascending, `-<property>` descending.

use canteen_model::{Filter, ModelError, Operator, Schema, Sort, Value};

/// Operator spellings, longest first so `<=` wins over `<`.
const OPERATORS: [(&str, Operator); 8] = [
    ("==", Operator::Equals),
    ("!=", Operator::NotEquals),
    ("<=", Operator::LessThanEqualTo),
    (">=", Operator::GreaterThanEqualTo),
    ("=", Operator::Equals),
    ("<", Operator::LessThan),
    (">", Operator::GreaterThan),
    ("~", Operator::Contains),
];

/// A filter expression split into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    pub property: String,
    pub operator: Operator,
    pub raw: serde_json::Value,
}

impl FilterExpr {
    pub fn parse(expr: &str) -> Result<Self, ModelError> {
        let start = expr
            .find(['=', '!', '<', '>', '~'])
            .ok_or_else(|| invalid(expr, "no operator"))?;
        let (property, rest) = expr.split_at(start);
        let property = property.trim();
        if property.is_empty() {
            return Err(invalid(expr, "no property"));
        }
        let (symbol, operator) = OPERATORS
            .iter()
            .find(|(symbol, _)| rest.starts_with(symbol))
            .ok_or_else(|| invalid(expr, "unknown operator"))?;
        let value = rest[symbol.len()..].trim();
        let raw = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));

        Ok(Self {
            property: property.to_string(),
            operator: *operator,
            raw,
        })
    }

    /// Decode the value by the property's basetype and build the filter.
    pub fn resolve(&self, schema: &Schema) -> Result<Filter, ModelError> {
        let property = schema
            .property(&self.property)
            .ok_or_else(|| ModelError::InvalidAttribute {
                op: "filter",
                name: self.property.clone(),
                kind: schema.kind().to_string(),
            })?;
        let value = Value::from_json(&self.raw, property.basetype())?;
        Ok(Filter::new(&self.property, self.operator, value))
    }
}

/// Parse a sort expression.
pub fn parse_sort(expr: &str) -> Result<Sort, ModelError> {
    let expr = expr.trim();
    let sort = match expr.split_at_checked(1) {
        Some(("-", property)) => Sort::desc(property),
        Some(("+", property)) => Sort::asc(property),
        _ => Sort::asc(expr),
    };
    if sort.property().is_empty() {
        return Err(invalid(expr, "no property"));
    }
    Ok(sort)
}

fn invalid(expr: &str, reason: &str) -> ModelError {
    ModelError::InvalidQuery(format!("\"{}\": {}", expr, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use canteen_model::Direction;

    #[test]
    fn longest_operator_wins() {
        let expr = FilterExpr::parse("age<=30").expect("parse");
        assert_eq!(expr.property, "age");
        assert_eq!(expr.operator, Operator::LessThanEqualTo);
        assert_eq!(expr.raw, serde_json::json!(30));
    }

    #[test]
    fn bare_values_are_strings() {
        let expr = FilterExpr::parse("name = Ada Lovelace").expect("parse");
        assert_eq!(expr.operator, Operator::Equals);
        assert_eq!(expr.raw, serde_json::json!("Ada Lovelace"));
    }

    #[test]
    fn missing_parts_rejected() {
        assert!(FilterExpr::parse("age").is_err());
        assert!(FilterExpr::parse(">=3").is_err());
    }

    #[test]
    fn sort_prefixes() {
        assert_eq!(parse_sort("-age").expect("sort").direction(), Direction::Descending);
        assert_eq!(parse_sort("+age").expect("sort").direction(), Direction::Ascending);
        assert_eq!(parse_sort("age").expect("sort").property(), "age");
        assert!(parse_sort("-").is_err());
    }
}
