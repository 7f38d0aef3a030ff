//! Listing parameters
//!
//! # Example
//!
//! ```rust
//! use avon::config::PaginationConfig;
//! use avon::query::QueryParams;
//! use serde_json::json;
//!
//! let params = QueryParams::from_pairs([
//!     ("filters[status]", "active"),
//!     ("filters[tags][]", "1"),
//!     ("filters[tags][]", "2"),
//!     ("filters[age][min]", "18"),
//!     ("orders[created_at]", "desc"),
//!     ("search", "alice"),
//!     ("page", "2"),
//!     ("per_page", "500"),
//!     ("trashed", "with"),
//! ]);
//!
//! assert_eq!(params.filters["status"], json!("active"));
//! assert_eq!(params.filters["tags"], json!(["1", "2"]));
//! assert_eq!(params.filters["age"], json!({"min": "18"}));
//! assert_eq!(params.filters["trashed"], json!("with"));
//! assert_eq!(params.orders["created_at"], json!("desc"));
//! assert_eq!(params.page_number(), 2);
//! assert_eq!(params.items_per_page(&PaginationConfig::default()), 100);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::PaginationConfig;
use crate::repository::Pagination;

/// Parsed listing parameters
///
/// `filters` and `orders` are keyed by handler key; the top-level `trashed`
/// parameter lands in `filters["trashed"]` unless a filter of that name was
/// given explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub filters: Map<String, Value>,

    #[serde(default)]
    pub orders: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,

    /// 1-indexed; `None` is the first page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u64>,
}

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse decoded query-string pairs
    ///
    /// Recognized shapes: `filters[key]`, `filters[key][]` (list),
    /// `filters[key][sub]` (object), the same for `orders`, plus `search`,
    /// `page`, `per_page` and `trashed`. Anything else is ignored, as are
    /// unparsable page numbers.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = Self::default();
        let mut trashed = None;
        for (name, value) in pairs {
            let (name, value) = (name.as_ref(), value.as_ref());
            match name {
                "search" => params.search = Some(value.to_string()),
                "page" => params.page = value.trim().parse().ok().or(params.page),
                "per_page" => params.per_page = value.trim().parse().ok().or(params.per_page),
                "trashed" => trashed = Some(value.to_string()),
                _ => {
                    if let Some(path) = bracketed(name, "filters") {
                        insert_path(&mut params.filters, &path, value);
                    } else if let Some(path) = bracketed(name, "orders") {
                        insert_path(&mut params.orders, &path, value);
                    }
                }
            }
        }
        if let Some(trashed) = trashed {
            params
                .filters
                .entry("trashed")
                .or_insert(Value::String(trashed));
        }
        params
    }

    #[must_use]
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_order(mut self, key: impl Into<String>, direction: impl Into<Value>) -> Self {
        self.orders.insert(key.into(), direction.into());
        self
    }

    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    #[must_use]
    pub fn with_page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    #[must_use]
    pub fn with_per_page(mut self, per_page: u64) -> Self {
        self.per_page = Some(per_page);
        self
    }

    /// Page number, at least 1
    #[must_use]
    pub fn page_number(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size clamped to `1..=max_per_page`
    #[must_use]
    pub fn items_per_page(&self, config: &PaginationConfig) -> u64 {
        self.per_page
            .unwrap_or(config.default_per_page)
            .clamp(1, config.max_per_page.max(1))
    }

    #[must_use]
    pub fn pagination(&self, config: &PaginationConfig) -> Pagination {
        Pagination::page(self.page_number(), self.items_per_page(config))
    }

    /// Search text, if any non-blank text was given
    #[must_use]
    pub fn search_text(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(feature = "http")]
mod extract {
    use axum::extract::{FromRequestParts, Query};
    use axum::http::request::Parts;
    use axum::http::Uri;

    use super::QueryParams;
    use crate::error::Error;

    impl QueryParams {
        /// Parse the query string of `uri`; percent-decoding is left to axum
        pub fn from_uri(uri: &Uri) -> Result<Self, Error> {
            let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri)
                .map_err(|e| Error::Validation(e.body_text()))?;
            Ok(Self::from_pairs(pairs))
        }
    }

    impl<S> FromRequestParts<S> for QueryParams
    where
        S: Send + Sync,
    {
        type Rejection = Error;

        async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
            Self::from_uri(&parts.uri)
        }
    }
}

/// `prefix[a][b]` → `["a", "b"]`
fn bracketed(name: &str, prefix: &str) -> Option<Vec<String>> {
    let mut rest = name.strip_prefix(prefix)?;
    let mut path = Vec::new();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let end = inner.find(']')?;
        path.push(inner[..end].to_string());
        rest = &inner[end + 1..];
    }
    match path.first() {
        Some(first) if !first.is_empty() => Some(path),
        _ => None,
    }
}

fn insert_path(target: &mut Map<String, Value>, path: &[String], value: &str) {
    let Some((key, rest)) = path.split_first() else {
        return;
    };
    match rest.first().map(String::as_str) {
        None => {
            target.insert(key.clone(), Value::String(value.to_string()));
        }
        Some("") => {
            let entry = target
                .entry(key.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            if let Value::Array(items) = entry {
                items.push(Value::String(value.to_string()));
            }
        }
        Some(_) => {
            let entry = target
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(nested) = entry {
                insert_path(nested, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let params = QueryParams::new();
        let config = PaginationConfig::default();
        assert_eq!(params.page_number(), 1);
        assert_eq!(params.items_per_page(&config), 15);
        assert_eq!(params.pagination(&config), Pagination::new(0, 15));
        assert!(params.search_text().is_none());
    }

    #[test]
    fn test_page_zero_and_per_page_zero() {
        let params = QueryParams::new().with_page(0).with_per_page(0);
        assert_eq!(params.page_number(), 1);
        assert_eq!(params.items_per_page(&PaginationConfig::default()), 1);
    }

    #[test]
    fn test_unknown_and_malformed_pairs_are_ignored() {
        let params = QueryParams::from_pairs([
            ("filters", "x"),
            ("filters[]", "x"),
            ("filtersfoo", "x"),
            ("filters[open", "x"),
            ("page", "abc"),
            ("other", "x"),
        ]);
        assert!(params.filters.is_empty());
        assert_eq!(params.page, None);
    }

    #[test]
    fn test_explicit_trashed_filter_wins() {
        let params = QueryParams::from_pairs([("trashed", "only"), ("filters[trashed]", "with")]);
        assert_eq!(params.filters["trashed"], json!("with"));
    }

    #[test]
    fn test_blank_search() {
        let params = QueryParams::new().with_search("   ");
        assert!(params.search_text().is_none());
        let params = QueryParams::new().with_search(" alice ");
        assert_eq!(params.search_text(), Some("alice"));
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_from_uri_decodes_brackets() {
        let uri: axum::http::Uri =
            "/posts?filters%5Bstatus%5D=live&filters%5Btags%5D%5B%5D=1&filters%5Btags%5D%5B%5D=2&search=rust+async&page=2"
                .parse()
                .unwrap();
        let params = QueryParams::from_uri(&uri).unwrap();
        assert_eq!(params.filters["status"], json!("live"));
        assert_eq!(params.filters["tags"], json!(["1", "2"]));
        assert_eq!(params.search_text(), Some("rust async"));
        assert_eq!(params.page_number(), 2);

        let bare: axum::http::Uri = "/posts".parse().unwrap();
        assert_eq!(QueryParams::from_uri(&bare).unwrap(), QueryParams::new());
    }

    #[cfg(feature = "http")]
    #[tokio::test]
    async fn test_extractor() {
        use axum::extract::FromRequestParts;

        let (mut parts, ()) = axum::http::Request::builder()
            .uri("/posts?orders%5Btitle%5D=desc&trashed=only")
            .body(())
            .unwrap()
            .into_parts();
        let params = QueryParams::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(params.orders["title"], json!("desc"));
        assert_eq!(params.filters["trashed"], json!("only"));
    }

    #[test]
    fn test_deserialize_from_json() {
        let params: QueryParams = serde_json::from_value(json!({
            "filters": {"status": "active"},
            "page": 3
        }))
        .unwrap();
        assert_eq!(params.filters["status"], json!("active"));
        assert_eq!(params.page_number(), 3);
        assert!(params.orders.is_empty());
    }
}
