//! Matches listing parameters to registered handlers
//!
//! Handlers run in registration order, whatever order the parameters came in.
//! A handler whose key is missing, or whose value it considers null, is never
//! invoked.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::trace;

use super::filter::Filter;
use super::ordering::Ordering;
use super::params::QueryParams;
use crate::context::RequestContext;
use crate::repository::Repository;

/// Registered filters and orderings of one resource
///
/// # Example
///
/// ```rust
/// use avon::backend::{Collection, CollectionRepository};
/// use avon::context::RequestContext;
/// use avon::query::{ColumnOrdering, ExactFilter, Matcher, QueryParams, TextFilter};
/// use avon::repository::{Order, Repository, ResourceSchema, Where};
///
/// let matcher = Matcher::new()
///     .filter(ExactFilter::new("status"))
///     .filter(TextFilter::new("title"))
///     .ordering(ColumnOrdering::new("created_at"));
///
/// let params = QueryParams::from_pairs([
///     ("filters[title]", "rust"),
///     ("filters[status]", "published"),
///     ("orders[created_at]", "desc"),
/// ]);
///
/// let mut repo = CollectionRepository::new(ResourceSchema::new("posts"), Collection::default());
/// matcher.apply(&RequestContext::anonymous(), &mut repo, &params);
///
/// assert_eq!(
///     repo.query().wheres,
///     vec![Where::eq("status", "published"), Where::like("title", "%rust%")]
/// );
/// assert_eq!(repo.query().orders, vec![Order::desc("created_at")]);
/// ```
#[derive(Clone, Default)]
pub struct Matcher {
    filters: Vec<Arc<dyn Filter>>,
    orderings: Vec<Arc<dyn Ordering>>,
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn ordering(mut self, ordering: impl Ordering + 'static) -> Self {
        self.orderings.push(Arc::new(ordering));
        self
    }

    pub fn filters(&self) -> &[Arc<dyn Filter>] {
        &self.filters
    }

    pub fn orderings(&self) -> &[Arc<dyn Ordering>] {
        &self.orderings
    }

    /// Filters with a usable value, paired with it, in registration order
    pub fn matched_filters<'a>(
        &'a self,
        values: &'a Map<String, Value>,
    ) -> Vec<(&'a dyn Filter, &'a Value)> {
        self.filters
            .iter()
            .filter_map(|filter| {
                let value = values.get(filter.key())?;
                if filter.is_null_value(value) {
                    trace!(key = filter.key(), "filter skipped: null value");
                    return None;
                }
                Some((filter.as_ref(), value))
            })
            .collect()
    }

    /// Orderings with a usable value, paired with it, in registration order
    pub fn matched_orderings<'a>(
        &'a self,
        values: &'a Map<String, Value>,
    ) -> Vec<(&'a dyn Ordering, &'a Value)> {
        self.orderings
            .iter()
            .filter_map(|ordering| {
                let value = values.get(ordering.key())?;
                if ordering.is_null_value(value) {
                    trace!(key = ordering.key(), "ordering skipped: null value");
                    return None;
                }
                Some((ordering.as_ref(), value))
            })
            .collect()
    }

    pub fn apply_filters(
        &self,
        ctx: &RequestContext,
        repo: &mut dyn Repository,
        values: &Map<String, Value>,
    ) {
        for (filter, value) in self.matched_filters(values) {
            trace!(key = filter.key(), %value, "filter applied");
            filter.apply(ctx, repo, value);
        }
    }

    pub fn apply_orderings(
        &self,
        ctx: &RequestContext,
        repo: &mut dyn Repository,
        values: &Map<String, Value>,
    ) {
        for (ordering, value) in self.matched_orderings(values) {
            trace!(key = ordering.key(), %value, "ordering applied");
            ordering.apply(ctx, repo, value);
        }
    }

    /// Filters, then orderings
    pub fn apply(&self, ctx: &RequestContext, repo: &mut dyn Repository, params: &QueryParams) {
        self.apply_filters(ctx, repo, &params.filters);
        self.apply_orderings(ctx, repo, &params.orders);
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("filters", &self.filters.iter().map(|h| h.key()).collect::<Vec<_>>())
            .field("orderings", &self.orderings.iter().map(|h| h.key()).collect::<Vec<_>>())
            .finish()
    }
}
