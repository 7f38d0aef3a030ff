//! Query evaluation over in-memory records
//!
//! Collection and file backends both hold a `Vec<Attributes>` and run every
//! query through here, so the two interpret conditions identically. The rules
//! mirror the SQL translation:
//!
//! - `=` / `!=` / `in` / `not in` compare loosely (`1 == "1"`); a null
//!   attribute never equals anything, and `!= x` / `not in` are false for it
//! - `= null` / `!= null` test for null
//! - range operators compare numerically when both sides are numbers (or
//!   numeric strings), otherwise as strings
//! - `like` is case-insensitive with `%` and `_` wildcards
//! - an empty `in` matches nothing; an empty `not in` matches everything
//! - nulls sort last ascending, first descending

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{display_key, Attributes, LooseKey, Model};
use crate::repository::{
    Direction, KeyKind, Operator, Order, Pagination, Query, QueryTransform, RepositoryError,
    RepositoryOperation, RepositoryResult, ResourceSchema, Where, WhereValue,
};

/// A query with its `like` patterns compiled once
pub(crate) struct Predicate<'q> {
    wheres: Vec<Condition<'q>>,
    transforms: Vec<Transform<'q>>,
}

struct Condition<'q> {
    condition: &'q Where,
    pattern: Option<Regex>,
}

enum Transform<'q> {
    Search { needle: String, columns: &'q [String] },
    AnyOf(Vec<Condition<'q>>),
}

impl<'q> Predicate<'q> {
    pub(crate) fn new(query: &'q Query) -> Self {
        let transforms = query
            .modifiers
            .iter()
            .map(|transform| match transform {
                QueryTransform::Search { text, columns } => Transform::Search {
                    needle: text.to_lowercase(),
                    columns,
                },
                QueryTransform::AnyOf(group) => {
                    Transform::AnyOf(group.iter().map(Condition::new).collect())
                }
            })
            .collect();
        Self {
            wheres: query.wheres.iter().map(Condition::new).collect(),
            transforms,
        }
    }

    pub(crate) fn matches(&self, record: &Attributes) -> bool {
        self.wheres.iter().all(|c| c.matches(record))
            && self.transforms.iter().all(|t| t.matches(record))
    }
}

impl<'q> Condition<'q> {
    fn new(condition: &'q Where) -> Self {
        let pattern = match (&condition.operator, &condition.value) {
            (Operator::Like, value) => like_pattern(&scalar_text(&value.to_json()).unwrap_or_default()),
            _ => None,
        };
        Self { condition, pattern }
    }

    fn matches(&self, record: &Attributes) -> bool {
        let actual = record.get(&self.condition.key).unwrap_or(&Value::Null);
        let expected = &self.condition.value;
        match self.condition.operator {
            Operator::Equal if expected.is_null() => actual.is_null(),
            Operator::NotEqual if expected.is_null() => !actual.is_null(),
            Operator::Equal => loose_eq(actual, expected),
            Operator::NotEqual => !actual.is_null() && !loose_eq(actual, expected),
            Operator::In => list(expected).iter().any(|v| loose_eq(actual, v)),
            Operator::NotIn => {
                let values = list(expected);
                values.is_empty()
                    || (!actual.is_null() && !values.iter().any(|v| loose_eq(actual, v)))
            }
            Operator::LessThan => compare(actual, expected) == Some(Ordering::Less),
            Operator::LessThanOrEqual => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::GreaterThan => compare(actual, expected) == Some(Ordering::Greater),
            Operator::GreaterThanOrEqual => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Like => match (&self.pattern, scalar_text(actual)) {
                (Some(pattern), Some(text)) => pattern.is_match(&text),
                _ => false,
            },
        }
    }
}

impl Transform<'_> {
    fn matches(&self, record: &Attributes) -> bool {
        match self {
            Self::Search { needle, columns } => columns.iter().any(|column| {
                record
                    .get(column)
                    .and_then(scalar_text)
                    .is_some_and(|text| text.to_lowercase().contains(needle.as_str()))
            }),
            Self::AnyOf(group) => group.iter().any(|c| c.matches(record)),
        }
    }
}

fn list(value: &WhereValue) -> Vec<WhereValue> {
    match value {
        WhereValue::List(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn loose_eq(actual: &Value, expected: &WhereValue) -> bool {
    match (LooseKey::from_value(actual), LooseKey::from_value(&expected.to_json())) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare(actual: &Value, expected: &WhereValue) -> Option<Ordering> {
    let expected = expected.to_json();
    if actual.is_null() || expected.is_null() {
        return None;
    }
    compare_values(actual, &expected)
}

/// Ordering of two non-null values; `None` when they are not comparable
///
/// Two strings compare lexically, as a TEXT column does, even when both look
/// numeric. A number against a numeric string compares numerically.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => match (scalar_text(a), scalar_text(b)) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => None,
            },
        },
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Translate a `like` pattern into an anchored, case-insensitive regex
fn like_pattern(pattern: &str) -> Option<Regex> {
    let mut source = String::from("^");
    let mut literal = String::new();
    for ch in pattern.chars() {
        match ch {
            '%' | '_' => {
                source.push_str(&regex::escape(&literal));
                literal.clear();
                source.push_str(if ch == '%' { ".*" } else { "." });
            }
            _ => literal.push(ch),
        }
    }
    source.push_str(&regex::escape(&literal));
    source.push('$');
    RegexBuilder::new(&source)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .ok()
}

fn order_cmp(a: &Attributes, b: &Attributes, orders: &[Order]) -> Ordering {
    for order in orders {
        let left = a.get(&order.key).unwrap_or(&Value::Null);
        let right = b.get(&order.key).unwrap_or(&Value::Null);
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare_values(left, right).unwrap_or(Ordering::Equal),
        };
        let ordering = match order.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Matching records, ordered (stable), then windowed
pub(crate) fn select(
    records: &[Attributes],
    query: &Query,
    pagination: Option<Pagination>,
) -> Vec<Attributes> {
    let predicate = Predicate::new(query);
    let mut selected: Vec<Attributes> = records
        .iter()
        .filter(|r| predicate.matches(r))
        .cloned()
        .collect();
    selected.sort_by(|a, b| order_cmp(a, b, &query.orders));
    match pagination {
        Some(window) => window.slice(selected),
        None => selected,
    }
}

pub(crate) fn count(records: &[Attributes], query: &Query) -> u64 {
    let predicate = Predicate::new(query);
    records.iter().filter(|r| predicate.matches(r)).count() as u64
}

/// Next primary key: integer max + 1, or a random UUID
pub(crate) fn next_key(schema: &ResourceSchema, records: &[Attributes]) -> RepositoryResult<Value> {
    match schema.key_kind {
        KeyKind::Uuid => Ok(Value::String(Uuid::new_v4().to_string())),
        KeyKind::Integer => {
            let max = records
                .iter()
                .filter_map(|r| r.get(&schema.primary_key))
                .filter_map(|v| match v {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.parse().ok(),
                    _ => None,
                })
                .max()
                .unwrap_or(0);
            max.checked_add(1).map(Value::from).ok_or_else(|| {
                RepositoryError::invariant_violation(
                    RepositoryOperation::Store,
                    format!("integer keys exhausted at {max}"),
                )
                .with_resource(&schema.name)
            })
        }
    }
}

fn position(records: &[Attributes], primary_key: &str, key: &Value) -> Option<usize> {
    let key = LooseKey::from_value(key)?;
    records.iter().position(|r| {
        r.get(primary_key)
            .and_then(LooseKey::from_value)
            .is_some_and(|k| k == key)
    })
}

pub(crate) fn insert(
    schema: &ResourceSchema,
    records: &mut Vec<Attributes>,
    model: Model,
) -> RepositoryResult<Model> {
    let mut attributes = model.into_attributes();
    let key = match attributes.get(&schema.primary_key).filter(|v| !v.is_null()) {
        Some(key) => {
            if position(records, &schema.primary_key, key).is_some() {
                return Err(RepositoryError::already_exists(&schema.name, display_key(key)));
            }
            key.clone()
        }
        None => next_key(schema, records)?,
    };
    attributes.insert(schema.primary_key.clone(), key);
    records.push(attributes.clone());
    Ok(Model::from_attributes(&schema.primary_key, attributes))
}

pub(crate) fn replace(
    schema: &ResourceSchema,
    records: &mut [Attributes],
    model: Model,
) -> RepositoryResult<Option<Model>> {
    let Some(key) = model.key().cloned() else {
        return Err(RepositoryError::invariant_violation(
            RepositoryOperation::Update,
            "cannot update a record without a primary key",
        )
        .with_resource(&schema.name));
    };
    let Some(index) = position(records, &schema.primary_key, &key) else {
        return Ok(None);
    };
    let attributes = model.into_attributes();
    records[index] = attributes.clone();
    Ok(Some(Model::from_attributes(&schema.primary_key, attributes)))
}

pub(crate) fn remove(records: &mut Vec<Attributes>, query: &Query) -> u64 {
    let predicate = Predicate::new(query);
    let before = records.len();
    records.retain(|r| !predicate.matches(r));
    (before - records.len()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn query(wheres: Vec<Where>) -> Query {
        Query {
            wheres,
            ..Query::default()
        }
    }

    fn ids(records: &[Attributes]) -> Vec<Value> {
        records.iter().map(|r| r["id"].clone()).collect()
    }

    fn sample() -> Vec<Attributes> {
        vec![
            record(json!({"id": 1, "name": "Alice", "age": 30, "deleted_at": null})),
            record(json!({"id": 2, "name": "bob", "age": "25", "deleted_at": "2024-01-01"})),
            record(json!({"id": 3, "name": "Carol", "age": null})),
        ]
    }

    #[test]
    fn test_loose_equality() {
        let records = sample();
        let found = select(&records, &query(vec![Where::eq("id", "2")]), None);
        assert_eq!(ids(&found), vec![json!(2)]);
        let found = select(&records, &query(vec![Where::in_values("id", vec!["1", "3"])]), None);
        assert_eq!(ids(&found), vec![json!(1), json!(3)]);
    }

    #[test]
    fn test_null_conditions() {
        let records = sample();
        let live = select(&records, &query(vec![Where::is_null("deleted_at")]), None);
        assert_eq!(ids(&live), vec![json!(1), json!(3)]);
        let trashed = select(&records, &query(vec![Where::is_not_null("deleted_at")]), None);
        assert_eq!(ids(&trashed), vec![json!(2)]);
    }

    #[test]
    fn test_not_equal_skips_nulls() {
        let records = sample();
        let found = select(&records, &query(vec![Where::ne("age", 30)]), None);
        assert_eq!(ids(&found), vec![json!(2)]);
    }

    #[test]
    fn test_empty_lists() {
        let records = sample();
        let none: Vec<i64> = Vec::new();
        assert!(select(&records, &query(vec![Where::in_values("id", none.clone())]), None).is_empty());
        assert_eq!(count(&records, &query(vec![Where::not_in_values("age", none)])), 3);
    }

    #[test]
    fn test_range_compares_numeric_strings() {
        let records = sample();
        let found = select(&records, &query(vec![Where::gte("age", 26)]), None);
        assert_eq!(ids(&found), vec![json!(1)]);
        let found = select(&records, &query(vec![Where::lt("age", 100)]), None);
        assert_eq!(ids(&found), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_like_is_case_insensitive_with_wildcards() {
        let records = sample();
        let found = select(&records, &query(vec![Where::like("name", "%O%")]), None);
        assert_eq!(ids(&found), vec![json!(2), json!(3)]);
        let found = select(&records, &query(vec![Where::like("name", "_lice")]), None);
        assert_eq!(ids(&found), vec![json!(1)]);
        let found = select(&records, &query(vec![Where::like("name", "a.*")]), None);
        assert!(found.is_empty());
    }

    #[test]
    fn test_search_and_any_of() {
        let records = sample();
        let mut q = Query::default();
        q.modifiers.push(QueryTransform::Search {
            text: "AR".into(),
            columns: vec!["name".into()],
        });
        assert_eq!(ids(&select(&records, &q, None)), vec![json!(3)]);

        let mut q = Query::default();
        q.modifiers.push(QueryTransform::AnyOf(vec![Where::eq("id", 1), Where::eq("name", "bob")]));
        assert_eq!(count(&records, &q), 2);

        let mut q = Query::default();
        q.modifiers.push(QueryTransform::AnyOf(vec![]));
        assert_eq!(count(&records, &q), 0);
    }

    #[test]
    fn test_ordering_with_nulls() {
        let records = sample();
        let mut q = Query::default();
        q.orders.push(Order::asc("age"));
        assert_eq!(ids(&select(&records, &q, None)), vec![json!(2), json!(1), json!(3)]);

        let mut q = Query::default();
        q.orders.push(Order::desc("age"));
        assert_eq!(ids(&select(&records, &q, None)), vec![json!(3), json!(1), json!(2)]);
    }

    #[test]
    fn test_orders_compose_as_tie_breakers() {
        let records = vec![
            record(json!({"id": 1, "group": "b", "rank": 2})),
            record(json!({"id": 2, "group": "a", "rank": 1})),
            record(json!({"id": 3, "group": "b", "rank": 1})),
        ];
        let mut q = Query::default();
        q.orders.push(Order::asc("group"));
        q.orders.push(Order::desc("rank"));
        assert_eq!(ids(&select(&records, &q, None)), vec![json!(2), json!(1), json!(3)]);
    }

    #[test]
    fn test_pagination_window() {
        let records = sample();
        let page = select(&records, &Query::default(), Some(Pagination::new(1, 1)));
        assert_eq!(ids(&page), vec![json!(2)]);
    }

    #[test]
    fn test_next_key() {
        let schema = ResourceSchema::new("users");
        assert_eq!(next_key(&schema, &sample()).unwrap(), json!(4));
        assert_eq!(next_key(&schema, &[]).unwrap(), json!(1));

        let schema = ResourceSchema::new("users").key_kind(KeyKind::Uuid);
        let key = next_key(&schema, &[]).unwrap();
        assert!(Uuid::parse_str(key.as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_exhausted_integer_keys() {
        let schema = ResourceSchema::new("users");
        let mut records = vec![record(json!({"id": i64::MAX}))];
        let err = insert(&schema, &mut records, Model::new("id").with("name", "x")).unwrap_err();
        assert_eq!(err.kind, crate::repository::RepositoryErrorKind::InvariantViolation);
        assert_eq!(err.operation, RepositoryOperation::Store);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_strings_compare_lexically() {
        let records = vec![
            record(json!({"id": 1, "code": "10"})),
            record(json!({"id": 2, "code": "9"})),
        ];
        let found = select(&records, &query(vec![Where::gte("code", "9")]), None);
        assert_eq!(ids(&found), vec![json!(2)]);

        let mut q = Query::default();
        q.orders.push(Order::asc("code"));
        assert_eq!(ids(&select(&records, &q, None)), vec![json!(1), json!(2)]);

        // a number against a numeric string still compares numerically
        let found = select(&records, &query(vec![Where::gte("code", 9)]), None);
        assert_eq!(ids(&found), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let schema = ResourceSchema::new("users");
        let mut records = sample();
        let err = insert(&schema, &mut records, Model::new("id").with("id", "1")).unwrap_err();
        assert_eq!(err.kind, crate::repository::RepositoryErrorKind::AlreadyExists);
    }

    #[test]
    fn test_replace_and_remove() {
        let schema = ResourceSchema::new("users");
        let mut records = sample();

        let replaced = replace(&schema, &mut records, Model::new("id").with("id", 3).with("name", "C"))
            .unwrap()
            .unwrap();
        assert_eq!(replaced.get("name"), Some(&json!("C")));
        assert!(replace(&schema, &mut records, Model::new("id").with("id", 9)).unwrap().is_none());

        assert_eq!(remove(&mut records, &query(vec![Where::lte("id", 2)])), 2);
        assert_eq!(ids(&records), vec![json!(3)]);
    }
}
