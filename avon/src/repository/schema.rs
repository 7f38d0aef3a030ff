//! Static description of a stored resource

use serde::{Deserialize, Serialize};

/// How new primary keys are generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Auto-incrementing integer
    #[default]
    Integer,
    /// Random UUID (v4)
    Uuid,
}

/// Name, key and search columns of a resource
///
/// # Example
///
/// ```rust
/// use avon::repository::ResourceSchema;
///
/// let schema = ResourceSchema::new("categories").searchable(["name"]);
/// assert_eq!(schema.singular, "category");
/// assert_eq!(schema.default_foreign_key(), "category_id");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// Plural resource name; also the table/collection name
    pub name: String,
    pub singular: String,
    pub primary_key: String,
    pub key_kind: KeyKind,
    /// Columns matched by free-text search
    pub searchable: Vec<String>,
}

impl ResourceSchema {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            singular: singularize(&name),
            name,
            primary_key: "id".to_string(),
            key_kind: KeyKind::Integer,
            searchable: Vec::new(),
        }
    }

    #[must_use]
    pub fn singular(mut self, singular: impl Into<String>) -> Self {
        self.singular = singular.into();
        self
    }

    #[must_use]
    pub fn primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    #[must_use]
    pub fn key_kind(mut self, key_kind: KeyKind) -> Self {
        self.key_kind = key_kind;
        self
    }

    #[must_use]
    pub fn searchable<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.searchable = columns.into_iter().map(Into::into).collect();
        self
    }

    /// `{singular}_{primary_key}`, the key other resources use to point here
    pub fn default_foreign_key(&self) -> String {
        format!("{}_{}", self.singular, self.primary_key)
    }
}

/// Plural endings that drop `es` rather than `s`
const ES_PLURALS: &[&str] = &[
    "sses", "shes", "tches", "nches", "rches", "xes", "tuses", "buses", "puses", "ruses",
];

/// Singular endings that already end in `s`
const S_SINGULARS: &[&str] = &["ss", "tus", "bus", "pus", "rus"];

fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        return format!("{stem}y");
    }
    if ES_PLURALS.iter().any(|ending| name.ends_with(ending)) {
        return name[..name.len() - 2].to_string();
    }
    if S_SINGULARS.iter().any(|ending| name.ends_with(ending)) {
        return name.to_string();
    }
    name.strip_suffix('s').unwrap_or(name).to_string()
}
