//! Ordering handlers

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::context::RequestContext;
use crate::repository::{Direction, Order, Repository, RepositoryExt};

/// A named ordering applied to a repository's pending query
pub trait Ordering: Send + Sync {
    fn key(&self) -> &str;

    /// Whether `value` means "not ordering"; defaults to anything but `asc`/`desc`
    fn is_null_value(&self, value: &Value) -> bool {
        direction(value).is_none()
    }

    fn apply(&self, ctx: &RequestContext, repo: &mut dyn Repository, value: &Value);
}

pub(crate) fn direction(value: &Value) -> Option<Direction> {
    value.as_str().and_then(Direction::parse)
}

/// Order by one column in the requested direction
#[derive(Debug, Clone)]
pub struct ColumnOrdering {
    key: String,
    column: String,
}

impl ColumnOrdering {
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

impl Ordering for ColumnOrdering {
    fn key(&self) -> &str {
        &self.key
    }

    fn apply(&self, _ctx: &RequestContext, repo: &mut dyn Repository, value: &Value) {
        if let Some(direction) = direction(value) {
            repo.order(Order::new(self.column.clone(), direction));
        }
    }
}

type OrderFn = dyn Fn(&RequestContext, &mut dyn Repository, Direction) + Send + Sync;

/// Ordering backed by a closure receiving the parsed direction
#[derive(Clone)]
pub struct OrderingFn {
    key: String,
    apply: Arc<OrderFn>,
}

impl OrderingFn {
    pub fn new<F>(key: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&RequestContext, &mut dyn Repository, Direction) + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            apply: Arc::new(apply),
        }
    }
}

impl fmt::Debug for OrderingFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderingFn").field("key", &self.key).finish()
    }
}

impl Ordering for OrderingFn {
    fn key(&self) -> &str {
        &self.key
    }

    fn apply(&self, ctx: &RequestContext, repo: &mut dyn Repository, value: &Value) {
        if let Some(direction) = direction(value) {
            (self.apply)(ctx, repo, direction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Collection, CollectionRepository};
    use crate::repository::ResourceSchema;
    use serde_json::json;

    #[test]
    fn test_column_ordering() {
        let ordering = ColumnOrdering::new("newest").column("created_at");
        assert!(ordering.is_null_value(&json!("sideways")));
        assert!(ordering.is_null_value(&json!(1)));

        let mut repo = CollectionRepository::new(ResourceSchema::new("posts"), Collection::default());
        ordering.apply(&RequestContext::anonymous(), &mut repo, &json!("DESC"));
        assert_eq!(repo.query().orders, vec![Order::desc("created_at")]);
    }

    #[test]
    fn test_ordering_fn_can_add_several_orders() {
        let ordering = OrderingFn::new("name", |_, repo, direction| {
            repo.order(Order::new("last_name", direction))
                .order(Order::new("first_name", direction));
        });
        let mut repo = CollectionRepository::new(ResourceSchema::new("users"), Collection::default());
        ordering.apply(&RequestContext::anonymous(), &mut repo, &json!("asc"));
        assert_eq!(
            repo.query().orders,
            vec![Order::asc("last_name"), Order::asc("first_name")]
        );
    }
}
