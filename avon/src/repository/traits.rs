//! Repository trait definitions
//!
//! # Overview
//!
//! - [`Repository`]: the primitives a storage backend implements
//! - [`RepositoryExt`]: the query-building and terminal operations every
//!   repository gets for free
//! - [`Transactional`] / [`TransactionalExt`]: optional transaction capability
//!
//! A repository instance holds one pending [`Query`]. Builder calls append to
//! it; terminal calls (`all`, `first`, `find`, `search`, `delete`) take it,
//! run it, and leave the repository with a fresh, scoped query.
//!
//! # Example
//!
//! ```rust
//! use avon::backend::{Collection, CollectionRepository};
//! use avon::model::Model;
//! use avon::repository::{Order, RepositoryExt, ResourceSchema, Where};
//! use serde_json::json;
//!
//! # tokio_test_block(async {
//! let posts = Collection::default();
//! let mut repo = CollectionRepository::new(ResourceSchema::new("posts"), posts);
//!
//! repo.store(Model::new("id").with("title", "b")).await?;
//! repo.store(Model::new("id").with("title", "a")).await?;
//!
//! let titles: Vec<_> = repo
//!     .where_(Where::ne("title", "c"))
//!     .order(Order::asc("title"))
//!     .all(vec![])
//!     .await?
//!     .into_iter()
//!     .map(|m| m.get("title").cloned())
//!     .collect();
//! assert_eq!(titles, vec![Some(json!("a")), Some(json!("b"))]);
//! # Ok::<(), avon::repository::RepositoryError>(())
//! # }).unwrap();
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use super::condition::{Order, Query, QueryTransform, Where, WhereValue};
use super::error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
use super::pagination::{Page, Pagination};
use super::schema::ResourceSchema;
use super::soft_delete::{scoped_query, SoftDeletes};
use crate::model::{display_key, Model};

/// Result type for repository operations
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Storage primitives
///
/// Backends implement these; everything else is built on top in
/// [`RepositoryExt`]. `fetch`, `count` and `remove` receive a complete query and
/// must honour every [`Where`], [`Order`] and [`QueryTransform`] in it.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Resource this repository reads and writes
    fn schema(&self) -> &ResourceSchema;

    /// Pending query
    fn query(&self) -> &Query;

    fn query_mut(&mut self) -> &mut Query;

    /// Soft-delete capability, if the resource supports it
    fn soft_deletes(&self) -> Option<&SoftDeletes> {
        None
    }

    /// Transaction capability, if the backend supports it
    fn as_transactional(&mut self) -> Option<&mut dyn Transactional> {
        None
    }

    /// Records matching `query`, ordered, then windowed by `pagination`
    async fn fetch(
        &mut self,
        query: &Query,
        pagination: Option<Pagination>,
    ) -> RepositoryResult<Vec<Model>>;

    /// Number of records matching `query`
    async fn count(&mut self, query: &Query) -> RepositoryResult<u64>;

    /// Insert a record, assigning a primary key when absent
    async fn insert(&mut self, model: Model) -> RepositoryResult<Model>;

    /// Replace the record with the same primary key; `None` when there is none
    async fn replace(&mut self, model: Model) -> RepositoryResult<Option<Model>>;

    /// Physically delete every record matching `query`
    async fn remove(&mut self, query: &Query) -> RepositoryResult<u64>;
}

/// Query building and terminal operations
///
/// Implemented for every [`Repository`], including `dyn Repository`.
#[async_trait]
pub trait RepositoryExt: Repository {
    /// Append a condition
    fn where_(&mut self, condition: Where) -> &mut Self {
        self.query_mut().wheres.push(condition);
        self
    }

    /// Append several conditions, in order
    fn wheres(&mut self, conditions: Vec<Where>) -> &mut Self {
        self.query_mut().wheres.extend(conditions);
        self
    }

    /// `where_(primary_key = key)`
    fn where_key(&mut self, key: Value) -> &mut Self {
        let condition = Where::eq(self.schema().primary_key.clone(), WhereValue::from_json(&key));
        self.where_(condition)
    }

    fn order(&mut self, order: Order) -> &mut Self {
        self.query_mut().orders.push(order);
        self
    }

    fn orders(&mut self, orders: Vec<Order>) -> &mut Self {
        self.query_mut().orders.extend(orders);
        self
    }

    /// Append a query transform (search, OR group)
    fn modify(&mut self, transform: QueryTransform) -> &mut Self {
        self.query_mut().modifiers.push(transform);
        self
    }

    /// The query a repository starts with: empty, plus the active scope when soft deletes apply
    fn fresh_query(&self) -> Query {
        scoped_query(self.soft_deletes())
    }

    /// Take the pending query, leaving a fresh one behind
    fn take_query(&mut self) -> Query {
        let fresh = self.fresh_query();
        std::mem::replace(self.query_mut(), fresh)
    }

    /// Every record matching the pending query plus `extra`
    async fn all(&mut self, extra: Vec<Where>) -> RepositoryResult<Vec<Model>> {
        let mut query = self.take_query();
        query.wheres.extend(extra);
        debug!(resource = %self.schema().name, wheres = ?query.wheres, orders = ?query.orders, "all");
        self.fetch(&query, None)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::All))
    }

    /// Head of [`RepositoryExt::all`] under the same ordering
    async fn first(&mut self, extra: Vec<Where>) -> RepositoryResult<Option<Model>> {
        let mut query = self.take_query();
        query.wheres.extend(extra);
        debug!(resource = %self.schema().name, wheres = ?query.wheres, "first");
        let found = self
            .fetch(&query, Some(Pagination::first_page(1)))
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::First))?;
        Ok(found.into_iter().next())
    }

    /// Record with the given primary key; absence is not an error
    async fn find(&mut self, key: Value) -> RepositoryResult<Option<Model>> {
        self.where_key(key);
        self.first(Vec::new())
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Find))
    }

    /// One page of the pending query, optionally narrowed by free text
    ///
    /// `text` is matched case-insensitively as a substring of any searchable
    /// column. Blank text, or a resource without searchable columns, applies no
    /// text filter. `count` is the total before pagination.
    async fn search(
        &mut self,
        text: &str,
        page: u64,
        per_page: u64,
    ) -> RepositoryResult<Page<Model>> {
        let mut query = self.take_query();
        let text = text.trim();
        let columns = self.schema().searchable.clone();
        if !text.is_empty() && !columns.is_empty() {
            query.modifiers.push(QueryTransform::Search {
                text: text.to_string(),
                columns,
            });
        }
        debug!(resource = %self.schema().name, wheres = ?query.wheres, text, page, per_page, "search");

        let count = self
            .count(&query)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Search))?;
        let items = self
            .fetch(&query, Some(Pagination::page(page, per_page)))
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Search))?;
        Ok(Page::new(items, count))
    }

    /// Insert a record; the stored form (with its key) is returned
    async fn store(&mut self, model: Model) -> RepositoryResult<Model> {
        debug!(resource = %self.schema().name, "store");
        self.insert(model).await
    }

    /// Replace an existing record addressed by its primary key
    ///
    /// Never inserts: a missing record is a `NotFound` error.
    async fn update(&mut self, model: Model) -> RepositoryResult<Model> {
        let resource = self.schema().name.clone();
        let key = match model.key() {
            Some(key) => display_key(key),
            None => {
                return Err(RepositoryError::invariant_violation(
                    RepositoryOperation::Update,
                    "cannot update a record without a primary key",
                )
                .with_resource(resource))
            }
        };
        debug!(resource = %resource, key = %key, "update");
        match self.replace(model).await? {
            Some(updated) => Ok(updated),
            None => Err(RepositoryError::not_found(resource, key)
                .with_operation(RepositoryOperation::Update)),
        }
    }

    /// Delete a record; soft-deleting repositories set the marker instead
    ///
    /// Returns whether a record was affected.
    async fn delete(&mut self, key: Value) -> RepositoryResult<bool> {
        if let Some(column) = self.soft_deletes().map(|s| s.column.clone()) {
            let Some(mut model) = self.find(key).await? else {
                return Ok(false);
            };
            model.set(column, chrono::Utc::now().to_rfc3339());
            self.update(model)
                .await
                .map_err(|e| e.with_operation(RepositoryOperation::SoftDelete))?;
            return Ok(true);
        }

        self.where_key(key);
        let query = self.take_query();
        debug!(resource = %self.schema().name, wheres = ?query.wheres, "delete");
        let removed = self
            .remove(&query)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Delete))?;
        Ok(removed > 0)
    }
}

impl<R: Repository + ?Sized> RepositoryExt for R {}

/// Transaction capability
///
/// Every write made through the repository between [`Transactional::begin`]
/// and [`Transactional::commit`] is undone together by
/// [`Transactional::rollback`].
#[async_trait]
pub trait Transactional: Repository {
    fn in_transaction(&self) -> bool;

    /// Open a transaction; fails with `InvariantViolation` if one is active
    async fn begin(&mut self) -> RepositoryResult<()>;

    async fn commit(&mut self) -> RepositoryResult<()>;

    async fn rollback(&mut self) -> RepositoryResult<()>;
}

/// Scoped transactions for every [`Transactional`] repository
pub trait TransactionalExt: Transactional {
    /// Run `f` inside a transaction
    ///
    /// Commits when `f` returns `Ok`; rolls back and returns the original error
    /// when it returns `Err`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use avon::backend::{Collection, CollectionRepository};
    /// use avon::model::Model;
    /// use avon::repository::{RepositoryExt, ResourceSchema, TransactionalExt};
    ///
    /// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
    /// let mut repo = CollectionRepository::new(ResourceSchema::new("tags"), Collection::default());
    /// let stored = repo
    ///     .transaction(|repo| Box::pin(async move { repo.store(Model::new("id").with("name", "x")).await }))
    ///     .await
    ///     .unwrap();
    /// assert!(stored.key().is_some());
    /// # });
    /// ```
    fn transaction<'s, T, F>(&'s mut self, f: F) -> BoxFuture<'s, RepositoryResult<T>>
    where
        T: Send + 's,
        F: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, RepositoryResult<T>> + Send + 's,
    {
        Box::pin(async move {
            self.begin().await?;
            match f(&mut *self).await {
                Ok(value) => {
                    self.commit().await?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback_err) = self.rollback().await {
                        warn!(error = %rollback_err, "rollback failed");
                    }
                    Err(err)
                }
            }
        })
    }
}

impl<R: Transactional + ?Sized> TransactionalExt for R {}

/// Whether an error means "no such record"
pub fn is_not_found(err: &RepositoryError) -> bool {
    err.kind == RepositoryErrorKind::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Collection, CollectionRepository};
    use serde_json::json;

    fn posts() -> CollectionRepository {
        CollectionRepository::new(ResourceSchema::new("posts").searchable(["title"]), Collection::default())
    }

    #[tokio::test]
    async fn test_where_appends_in_order() {
        let mut repo = posts();
        let c1 = Where::eq("a", 1);
        let c2 = Where::gt("b", 2);
        repo.where_(c1.clone()).where_(c2.clone());
        assert_eq!(repo.query().wheres, vec![c1, c2]);
    }

    #[tokio::test]
    async fn test_terminal_resets_query() {
        let mut repo = posts();
        repo.where_(Where::eq("title", "x")).order(Order::desc("id"));
        repo.all(vec![]).await.unwrap();
        assert_eq!(repo.query(), &Query::default());
    }

    #[tokio::test]
    async fn test_find_missing_is_none() {
        let mut repo = posts();
        assert!(repo.find(json!(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let mut repo = posts();
        let err = repo
            .update(Model::new("id").with("id", 5).with("title", "x"))
            .await
            .unwrap_err();
        assert!(is_not_found(&err));
        assert_eq!(err.operation, RepositoryOperation::Update);
        assert!(repo.all(vec![]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_without_key_is_invariant_violation() {
        let mut repo = posts();
        let err = repo.update(Model::new("id")).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvariantViolation);
    }

    #[tokio::test]
    async fn test_delete_physical() {
        let mut repo = posts();
        let stored = repo.store(Model::new("id").with("title", "x")).await.unwrap();
        let key = stored.key().cloned().unwrap();

        assert!(repo.delete(key.clone()).await.unwrap());
        assert!(!repo.delete(key).await.unwrap());
    }

    #[tokio::test]
    async fn test_search_counts_before_pagination() {
        let mut repo = posts();
        for title in ["Rust tips", "rusty nails", "Go tips"] {
            repo.store(Model::new("id").with("title", title)).await.unwrap();
        }

        let page = repo.search("RUST", 1, 1).await.unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.items.len(), 1);

        let everything = repo.search("  ", 1, 10).await.unwrap();
        assert_eq!(everything.count, 3);
    }

    #[tokio::test]
    async fn test_search_ignored_without_searchable_columns() {
        let mut repo = CollectionRepository::new(ResourceSchema::new("tags"), Collection::default());
        repo.store(Model::new("id").with("name", "a")).await.unwrap();
        let page = repo.search("zzz", 1, 10).await.unwrap();
        assert_eq!(page.count, 1);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let mut repo = posts();
        let result: RepositoryResult<()> = repo
            .transaction(|repo| {
                Box::pin(async move {
                    repo.store(Model::new("id").with("title", "doomed")).await?;
                    Err(RepositoryError::validation_failed("nope"))
                })
            })
            .await;

        assert_eq!(result.unwrap_err().message, "nope");
        assert!(!repo.in_transaction());
        assert!(repo.all(vec![]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transaction_commits_on_ok() {
        let mut repo = posts();
        repo.transaction(|repo| {
            Box::pin(async move {
                repo.store(Model::new("id").with("title", "kept")).await?;
                Ok(())
            })
        })
        .await
        .unwrap();

        assert_eq!(repo.all(vec![]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_nested_begin_is_invariant_violation() {
        let mut repo = posts();
        repo.begin().await.unwrap();
        let err = repo.begin().await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvariantViolation);
        repo.rollback().await.unwrap();
    }
}
