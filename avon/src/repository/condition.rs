//! Condition model shared by every backend
//!
//! [`Where`] and [`Order`] are plain values. A repository appends them to its
//! [`Query`] in the order they are given and hands the whole query to the backend
//! when a terminal operation runs. Backends translate the query one condition at a
//! time; nothing here is reordered or merged.
//!
//! # Example
//!
//! ```rust
//! use avon::repository::{Order, Query, Where};
//!
//! let mut query = Query::default();
//! query.wheres.push(Where::eq("status", "active"));
//! query.wheres.push(Where::gte("age", 18));
//! query.orders.push(Order::desc("created_at"));
//!
//! assert_eq!(query.wheres[0], Where::eq("status", "active"));
//! assert_eq!(query.orders.len(), 1);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators understood by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Equal to (=). Comparing against `Null` means "is null".
    #[serde(rename = "=")]
    Equal,
    /// Not equal to (!=). Comparing against `Null` means "is not null".
    #[serde(rename = "!=")]
    NotEqual,
    /// Less than (<)
    #[serde(rename = "<")]
    LessThan,
    /// Less than or equal to (<=)
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Greater than (>)
    #[serde(rename = ">")]
    GreaterThan,
    /// Greater than or equal to (>=)
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// Value is one of a list
    #[serde(rename = "in")]
    In,
    /// Value is none of a list
    #[serde(rename = "not in")]
    NotIn,
    /// Case-insensitive pattern match with `%` and `_` wildcards
    #[serde(rename = "like")]
    Like,
}

impl Operator {
    /// Whether the operator expects a list operand
    #[must_use]
    pub const fn takes_list(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::LessThan => write!(f, "<"),
            Self::LessThanOrEqual => write!(f, "<="),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterThanOrEqual => write!(f, ">="),
            Self::In => write!(f, "in"),
            Self::NotIn => write!(f, "not in"),
            Self::Like => write!(f, "like"),
        }
    }
}

/// Operand of a [`Where`] condition
///
/// A scalar, or a list of scalars for `in` / `not in`.
///
/// # Example
///
/// ```rust
/// use avon::repository::WhereValue;
///
/// let name: WhereValue = "alice".into();
/// let age: WhereValue = 42_i64.into();
/// let ids: WhereValue = vec![1_i64, 2, 3].into();
///
/// assert!(ids.as_list().is_some());
/// assert!(WhereValue::Null.is_null());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WhereValue {
    /// Absence of a value
    Null,
    /// Boolean value
    Boolean(bool),
    /// 64-bit integer value
    Integer(i64),
    /// 64-bit floating point value
    Float(f64),
    /// String value
    String(String),
    /// List of scalars
    List(Vec<WhereValue>),
}

impl WhereValue {
    /// Build an operand from a JSON value
    ///
    /// Arrays become lists; objects are carried as their JSON text.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Value::Object(_) => Self::String(value.to_string()),
        }
    }

    /// Convert back into a JSON value
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Boolean(b) => Value::Bool(*b),
            Self::Integer(n) => Value::from(*n),
            Self::Float(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            Self::String(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The list items, if this is a list operand
    #[must_use]
    pub fn as_list(&self) -> Option<&[WhereValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for WhereValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for WhereValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for WhereValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for WhereValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for WhereValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for WhereValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Value> for WhereValue {
    fn from(value: Value) -> Self {
        Self::from_json(&value)
    }
}

impl From<&Value> for WhereValue {
    fn from(value: &Value) -> Self {
        Self::from_json(value)
    }
}

impl<T: Into<WhereValue>> From<Vec<T>> for WhereValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<WhereValue>> From<Option<T>> for WhereValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A single filter condition
///
/// # Example
///
/// ```rust
/// use avon::repository::{Operator, Where};
///
/// let status = Where::eq("status", "active");
/// let adults = Where::gte("age", 18);
/// let tagged = Where::in_values("tag_id", vec![1_i64, 2]);
/// let named = Where::like("name", "%smith%");
/// let live = Where::is_null("deleted_at");
///
/// assert_eq!(adults.operator, Operator::GreaterThanOrEqual);
/// assert!(live.value.is_null());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Where {
    /// Attribute (column) name
    pub key: String,
    /// Comparison operator
    pub operator: Operator,
    /// Operand
    pub value: WhereValue,
}

impl Where {
    pub fn new(key: impl Into<String>, operator: Operator, value: impl Into<WhereValue>) -> Self {
        Self {
            key: key.into(),
            operator,
            value: value.into(),
        }
    }

    /// `key = value`
    pub fn eq(key: impl Into<String>, value: impl Into<WhereValue>) -> Self {
        Self::new(key, Operator::Equal, value)
    }

    /// `key != value`
    pub fn ne(key: impl Into<String>, value: impl Into<WhereValue>) -> Self {
        Self::new(key, Operator::NotEqual, value)
    }

    /// `key < value`
    pub fn lt(key: impl Into<String>, value: impl Into<WhereValue>) -> Self {
        Self::new(key, Operator::LessThan, value)
    }

    /// `key <= value`
    pub fn lte(key: impl Into<String>, value: impl Into<WhereValue>) -> Self {
        Self::new(key, Operator::LessThanOrEqual, value)
    }

    /// `key > value`
    pub fn gt(key: impl Into<String>, value: impl Into<WhereValue>) -> Self {
        Self::new(key, Operator::GreaterThan, value)
    }

    /// `key >= value`
    pub fn gte(key: impl Into<String>, value: impl Into<WhereValue>) -> Self {
        Self::new(key, Operator::GreaterThanOrEqual, value)
    }

    /// `key in (values…)`
    pub fn in_values<T: Into<WhereValue>>(
        key: impl Into<String>,
        values: impl IntoIterator<Item = T>,
    ) -> Self {
        Self::new(
            key,
            Operator::In,
            WhereValue::List(values.into_iter().map(Into::into).collect()),
        )
    }

    /// `key not in (values…)`
    pub fn not_in_values<T: Into<WhereValue>>(
        key: impl Into<String>,
        values: impl IntoIterator<Item = T>,
    ) -> Self {
        Self::new(
            key,
            Operator::NotIn,
            WhereValue::List(values.into_iter().map(Into::into).collect()),
        )
    }

    /// `key like pattern`
    pub fn like(key: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(key, Operator::Like, WhereValue::String(pattern.into()))
    }

    /// `key is null`
    pub fn is_null(key: impl Into<String>) -> Self {
        Self::new(key, Operator::Equal, WhereValue::Null)
    }

    /// `key is not null`
    pub fn is_not_null(key: impl Into<String>) -> Self {
        Self::new(key, Operator::NotEqual, WhereValue::Null)
    }
}

impl fmt::Display for Where {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.key, self.operator, self.value.to_json())
    }
}

/// Direction for ordering results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ascending (A-Z, 0-9); nulls sort last
    #[default]
    Asc,
    /// Descending (Z-A, 9-0); nulls sort first
    Desc,
}

impl Direction {
    /// Parse `asc` / `desc` case-insensitively
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "asc"),
            Self::Desc => write!(f, "desc"),
        }
    }
}

/// Sort key; several orders compose left to right as tie-breakers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub key: String,
    pub direction: Direction,
}

impl Order {
    pub fn new(key: impl Into<String>, direction: Direction) -> Self {
        Self {
            key: key.into(),
            direction,
        }
    }

    pub fn asc(key: impl Into<String>) -> Self {
        Self::new(key, Direction::Asc)
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Self::new(key, Direction::Desc)
    }
}

/// Query shapes that a flat AND-list of [`Where`] cannot express
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTransform {
    /// Case-insensitive substring match of `text` against any of `columns`
    Search { text: String, columns: Vec<String> },
    /// Matches when at least one condition matches; an empty group matches nothing
    AnyOf(Vec<Where>),
}

/// Accumulated query state of one repository instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub wheres: Vec<Where>,
    pub orders: Vec<Order>,
    pub modifiers: Vec<QueryTransform>,
}

impl Query {
    /// Whether any accumulated condition is structurally equal to `condition`
    #[must_use]
    pub fn has_where(&self, condition: &Where) -> bool {
        self.wheres.iter().any(|w| w == condition)
    }

    /// Drop every accumulated condition structurally equal to one of `conditions`
    pub fn remove_wheres(&mut self, conditions: &[Where]) {
        self.wheres.retain(|w| !conditions.contains(w));
    }
}
