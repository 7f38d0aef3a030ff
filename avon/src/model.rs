//! Records exchanged with repositories
//!
//! A [`Model`] is a JSON object of persisted attributes plus the name of its
//! primary key attribute. Relation attachments live in a separate map and are
//! never written back to storage. Related models loaded through a pivot carry
//! the pivot row as a non-persisted decoration.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Attributes of a record, keyed by column name
pub type Attributes = Map<String, Value>;

/// A record with a known primary key attribute
///
/// # Example
///
/// ```rust
/// use avon::model::Model;
/// use serde_json::json;
///
/// let mut post = Model::new("id").with("id", 1).with("title", "Hello");
/// post.set("title", "Hello again");
///
/// assert_eq!(post.key(), Some(&json!(1)));
/// assert_eq!(post.get("title"), Some(&json!("Hello again")));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    key_name: String,
    attributes: Attributes,
    relations: BTreeMap<String, Related>,
    pivot: Option<PivotRow>,
}

/// A relation attachment
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// belongs-to / has-one
    One(Option<Box<Model>>),
    /// has-many / belongs-to-many
    Many(Vec<Model>),
}

impl Related {
    /// Attached models, regardless of cardinality
    pub fn models(&self) -> Vec<&Model> {
        match self {
            Self::One(model) => model.iter().map(AsRef::as_ref).collect(),
            Self::Many(models) => models.iter().collect(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::One(None) => Value::Null,
            Self::One(Some(model)) => model.to_json(),
            Self::Many(models) => Value::Array(models.iter().map(Model::to_json).collect()),
        }
    }
}

/// Pivot row carried by a model loaded through a many-to-many relation
#[derive(Debug, Clone, PartialEq)]
pub struct PivotRow {
    /// The full pivot record
    pub attributes: Attributes,
    /// Fields exposed when the related model is serialized
    pub fields: Vec<String>,
}

impl PivotRow {
    pub fn new(attributes: Attributes, fields: Vec<String>) -> Self {
        Self { attributes, fields }
    }

    fn to_json(&self) -> Value {
        let exposed = self
            .fields
            .iter()
            .map(|field| {
                let value = self.attributes.get(field).cloned().unwrap_or(Value::Null);
                (field.clone(), value)
            })
            .collect();
        Value::Object(exposed)
    }
}

impl Model {
    /// Create an empty model whose primary key attribute is `key_name`
    pub fn new(key_name: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            attributes: Attributes::new(),
            relations: BTreeMap::new(),
            pivot: None,
        }
    }

    pub fn from_attributes(key_name: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            attributes,
            ..Self::new(key_name)
        }
    }

    /// Build a model from a JSON value; anything but an object yields an empty model
    pub fn from_json(key_name: impl Into<String>, value: Value) -> Self {
        match value {
            Value::Object(attributes) => Self::from_attributes(key_name, attributes),
            _ => Self::new(key_name),
        }
    }

    /// Builder form of [`Model::set`]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// The primary key value, if set and not null
    pub fn key(&self) -> Option<&Value> {
        self.attributes.get(&self.key_name).filter(|v| !v.is_null())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Persisted attributes only; relations and pivot decoration are dropped
    pub fn into_attributes(self) -> Attributes {
        self.attributes
    }

    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) {
        self.relations.insert(name.into(), related);
    }

    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub fn relations(&self) -> &BTreeMap<String, Related> {
        &self.relations
    }

    pub fn set_pivot(&mut self, pivot: PivotRow) {
        self.pivot = Some(pivot);
    }

    pub fn pivot(&self) -> Option<&PivotRow> {
        self.pivot.as_ref()
    }

    /// Attributes, then relations, then the exposed pivot fields under `pivot`
    pub fn to_json(&self) -> Value {
        let mut object = self.attributes.clone();
        for (name, related) in &self.relations {
            object.insert(name.clone(), related.to_json());
        }
        if let Some(ref pivot) = self.pivot {
            object.insert("pivot".to_string(), pivot.to_json());
        }
        Value::Object(object)
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Loose key used to match records across repositories
///
/// Integers, integral floats and their string forms compare equal, so `1`,
/// `1.0` and `"1"` address the same record. Booleans compare by their text.
/// Null, arrays and objects are not keys.
///
/// # Example
///
/// ```rust
/// use avon::model::LooseKey;
/// use serde_json::json;
///
/// assert_eq!(LooseKey::from_value(&json!(1)), LooseKey::from_value(&json!("1")));
/// assert_eq!(LooseKey::from_value(&json!(2.0)), LooseKey::from_value(&json!(2)));
/// assert!(LooseKey::from_value(&json!(null)).is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LooseKey(String);

impl LooseKey {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(canonical_number(n))),
            Value::Bool(b) => Some(Self(b.to_string())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LooseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}

/// Render a key value for error messages and logs
pub(crate) fn display_key(value: &Value) -> String {
    LooseKey::from_value(value).map_or_else(|| value.to_string(), |k| k.0)
}
