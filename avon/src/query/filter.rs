//! Filter handlers
//!
//! A filter is registered under a key; the matcher hands it the parameter value
//! for that key. Each filter decides for itself which values count as "no
//! input" through [`Filter::is_null_value`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::context::RequestContext;
use crate::model::LooseKey;
use crate::repository::{Repository, RepositoryExt, SoftDeleteExt, Where};

/// A named filter applied to a repository's pending query
pub trait Filter: Send + Sync {
    /// Parameter key this filter answers to
    fn key(&self) -> &str;

    /// Whether `value` means "not filtering"
    ///
    /// Defaults to null, blank strings and empty lists or objects.
    fn is_null_value(&self, value: &Value) -> bool {
        is_blank(value)
    }

    /// Add zero or more conditions for `value`
    fn apply(&self, ctx: &RequestContext, repo: &mut dyn Repository, value: &Value);
}

pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Numeric strings become numbers; everything else is kept
fn coerce(value: &Value) -> Value {
    if let Value::String(s) = value {
        let trimmed = s.trim();
        if let Ok(n) = trimmed.parse::<i64>() {
            return Value::from(n);
        }
        if let Some(n) = trimmed
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .and_then(serde_json::Number::from_f64)
        {
            return Value::Number(n);
        }
    }
    value.clone()
}

/// `column = value`, or `column in values` for a list
#[derive(Debug, Clone)]
pub struct ExactFilter {
    key: String,
    column: String,
}

impl ExactFilter {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            column: key.clone(),
            key,
        }
    }

    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }
}

impl Filter for ExactFilter {
    fn key(&self) -> &str {
        &self.key
    }

    fn apply(&self, _ctx: &RequestContext, repo: &mut dyn Repository, value: &Value) {
        match value {
            Value::Array(items) => repo.where_(Where::in_values(self.column.clone(), items)),
            scalar => repo.where_(Where::eq(self.column.clone(), scalar)),
        };
    }
}

/// `column in values`; a single value selects one option
#[derive(Debug, Clone)]
pub struct SelectFilter {
    key: String,
    column: String,
    options: Option<Vec<Value>>,
}

impl SelectFilter {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            column: key.clone(),
            key,
            options: None,
        }
    }

    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Restrict selectable values; anything else is discarded
    #[must_use]
    pub fn options<I, V>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    fn selected(&self, value: &Value) -> Vec<Value> {
        let values = match value {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            scalar => vec![scalar.clone()],
        };
        match self.options {
            Some(ref options) => values
                .into_iter()
                .filter(|v| {
                    let key = LooseKey::from_value(v);
                    key.is_some() && options.iter().any(|o| LooseKey::from_value(o) == key)
                })
                .collect(),
            None => values,
        }
    }
}

impl Filter for SelectFilter {
    fn key(&self) -> &str {
        &self.key
    }

    fn is_null_value(&self, value: &Value) -> bool {
        is_blank(value) || self.selected(value).is_empty()
    }

    fn apply(&self, _ctx: &RequestContext, repo: &mut dyn Repository, value: &Value) {
        let selected = self.selected(value);
        repo.where_(Where::in_values(self.column.clone(), &selected));
    }
}

/// Case-insensitive substring match
#[derive(Debug, Clone)]
pub struct TextFilter {
    key: String,
    column: String,
}

impl TextFilter {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            column: key.clone(),
            key,
        }
    }

    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }
}

impl Filter for TextFilter {
    fn key(&self) -> &str {
        &self.key
    }

    fn is_null_value(&self, value: &Value) -> bool {
        !matches!(value, Value::String(s) if !s.trim().is_empty())
            && !matches!(value, Value::Number(_))
    }

    fn apply(&self, _ctx: &RequestContext, repo: &mut dyn Repository, value: &Value) {
        let text = match value {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        };
        repo.where_(Where::like(self.column.clone(), format!("%{}%", text)));
    }
}

/// `column = true|false`; accepts booleans and `1/0`, `true/false`, `yes/no`, `on/off`
#[derive(Debug, Clone)]
pub struct BooleanFilter {
    key: String,
    column: String,
}

impl BooleanFilter {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            column: key.clone(),
            key,
        }
    }

    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    fn parse(value: &Value) -> Option<bool> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => match n.as_i64() {
                Some(1) => Some(true),
                Some(0) => Some(false),
                _ => None,
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl Filter for BooleanFilter {
    fn key(&self) -> &str {
        &self.key
    }

    fn is_null_value(&self, value: &Value) -> bool {
        Self::parse(value).is_none()
    }

    fn apply(&self, _ctx: &RequestContext, repo: &mut dyn Repository, value: &Value) {
        if let Some(flag) = Self::parse(value) {
            repo.where_(Where::eq(self.column.clone(), flag));
        }
    }
}

/// Inclusive bounds from `{"min": …, "max": …}` or `[min, max]`
#[derive(Debug, Clone)]
pub struct RangeFilter {
    key: String,
    column: String,
}

impl RangeFilter {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            column: key.clone(),
            key,
        }
    }

    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    fn bounds(value: &Value) -> (Option<Value>, Option<Value>) {
        let (min, max) = match value {
            Value::Object(map) => (map.get("min"), map.get("max")),
            Value::Array(items) => (items.first(), items.get(1)),
            _ => (None, None),
        };
        let bound = |v: Option<&Value>| v.filter(|v| !is_blank(v)).map(coerce);
        (bound(min), bound(max))
    }
}

impl Filter for RangeFilter {
    fn key(&self) -> &str {
        &self.key
    }

    fn is_null_value(&self, value: &Value) -> bool {
        matches!(Self::bounds(value), (None, None))
    }

    fn apply(&self, _ctx: &RequestContext, repo: &mut dyn Repository, value: &Value) {
        let (min, max) = Self::bounds(value);
        if let Some(min) = min {
            repo.where_(Where::gte(self.column.clone(), min));
        }
        if let Some(max) = max {
            repo.where_(Where::lte(self.column.clone(), max));
        }
    }
}

/// Soft-delete scope selection: `with`, `only` or `without`
#[derive(Debug, Clone)]
pub struct TrashedFilter {
    key: String,
}

impl TrashedFilter {
    pub fn new() -> Self {
        Self {
            key: "trashed".to_string(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    fn mode(value: &Value) -> Option<&'static str> {
        match value.as_str()?.trim().to_ascii_lowercase().as_str() {
            "with" => Some("with"),
            "only" => Some("only"),
            "without" => Some("without"),
            _ => None,
        }
    }
}

impl Default for TrashedFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for TrashedFilter {
    fn key(&self) -> &str {
        &self.key
    }

    fn is_null_value(&self, value: &Value) -> bool {
        Self::mode(value).is_none()
    }

    fn apply(&self, _ctx: &RequestContext, repo: &mut dyn Repository, value: &Value) {
        match Self::mode(value) {
            Some("with") => {
                repo.with_trashed();
            }
            Some("only") => {
                repo.only_trashed();
            }
            Some(_) => {
                repo.without_trashed();
            }
            None => {}
        }
    }
}

type ApplyFn = dyn Fn(&RequestContext, &mut dyn Repository, &Value) + Send + Sync;

/// Filter backed by a closure
///
/// # Example
///
/// ```rust
/// use avon::query::{Filter, FilterFn};
/// use avon::repository::{RepositoryExt, Where};
///
/// let mine = FilterFn::new("mine", |ctx, repo, _value| {
///     if let Some(user_id) = ctx.actor::<i64>() {
///         repo.where_(Where::eq("user_id", *user_id));
///     }
/// });
/// assert_eq!(mine.key(), "mine");
/// ```
#[derive(Clone)]
pub struct FilterFn {
    key: String,
    apply: Arc<ApplyFn>,
}

impl FilterFn {
    pub fn new<F>(key: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&RequestContext, &mut dyn Repository, &Value) + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            apply: Arc::new(apply),
        }
    }
}

impl fmt::Debug for FilterFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterFn").field("key", &self.key).finish()
    }
}

impl Filter for FilterFn {
    fn key(&self) -> &str {
        &self.key
    }

    fn apply(&self, ctx: &RequestContext, repo: &mut dyn Repository, value: &Value) {
        (self.apply)(ctx, repo, value);
    }
}
