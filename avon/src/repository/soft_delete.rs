//! Soft-delete lifecycle
//!
//! A soft-deleting repository always carries exactly one scope condition on
//! its marker column, except in with-trashed mode where it carries none:
//!
//! | scope         | condition            |
//! |---------------|----------------------|
//! | active        | `deleted_at = null`  |
//! | only-trashed  | `deleted_at != null` |
//! | with-trashed  | none                 |
//!
//! Switching scope removes every earlier scope condition by structural
//! equality before adding the new one.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::condition::{Query, Where};
use super::error::{RepositoryError, RepositoryOperation};
use super::traits::{Repository, RepositoryExt, RepositoryResult};
use crate::model::Model;

/// Soft-delete capability of a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDeletes {
    /// Marker column; null while the record is live
    pub column: String,
}

impl SoftDeletes {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }

    /// `column = null`
    pub fn active_scope(&self) -> Where {
        Where::is_null(self.column.clone())
    }

    /// `column != null`
    pub fn trashed_scope(&self) -> Where {
        Where::is_not_null(self.column.clone())
    }

    fn scopes(&self) -> [Where; 2] {
        [self.active_scope(), self.trashed_scope()]
    }
}

impl Default for SoftDeletes {
    fn default() -> Self {
        Self::new("deleted_at")
    }
}

/// Initial query of a repository: empty, or active scope when soft deletes apply
pub fn scoped_query(soft_deletes: Option<&SoftDeletes>) -> Query {
    let mut query = Query::default();
    if let Some(soft_deletes) = soft_deletes {
        query.wheres.push(soft_deletes.active_scope());
    }
    query
}

/// Scope switching and the trashed-record operations
///
/// Scope builders are no-ops on repositories without soft deletes;
/// `force_delete` and `restore` fail there with `InvariantViolation`.
///
/// # Example
///
/// ```rust
/// use avon::backend::{Collection, CollectionRepository};
/// use avon::repository::{Repository, ResourceSchema, SoftDeleteExt, SoftDeletes, Where};
///
/// let mut repo = CollectionRepository::new(ResourceSchema::new("posts"), Collection::default())
///     .with_soft_deletes(SoftDeletes::default());
///
/// repo.with_trashed().only_trashed();
/// assert_eq!(repo.query().wheres, vec![Where::is_not_null("deleted_at")]);
/// ```
#[async_trait]
pub trait SoftDeleteExt: Repository {
    /// Include trashed records
    fn with_trashed(&mut self) -> &mut Self {
        if let Some(soft_deletes) = self.soft_deletes().cloned() {
            self.query_mut().remove_wheres(&soft_deletes.scopes());
        }
        self
    }

    /// Exclude trashed records (the default scope)
    fn without_trashed(&mut self) -> &mut Self {
        if let Some(soft_deletes) = self.soft_deletes().cloned() {
            let query = self.query_mut();
            query.remove_wheres(&soft_deletes.scopes());
            query.wheres.push(soft_deletes.active_scope());
        }
        self
    }

    /// Only trashed records
    fn only_trashed(&mut self) -> &mut Self {
        if let Some(soft_deletes) = self.soft_deletes().cloned() {
            let query = self.query_mut();
            query.remove_wheres(&soft_deletes.scopes());
            query.wheres.push(soft_deletes.trashed_scope());
        }
        self
    }

    /// Physically delete a record, trashed or not
    async fn force_delete(&mut self, key: Value) -> RepositoryResult<bool> {
        if self.soft_deletes().is_none() {
            return Err(RepositoryError::invariant_violation(
                RepositoryOperation::ForceDelete,
                "repository does not support soft deletes",
            )
            .with_resource(self.schema().name.clone()));
        }

        self.with_trashed().where_key(key);
        let query = self.take_query();
        debug!(resource = %self.schema().name, wheres = ?query.wheres, "force_delete");
        let removed = self
            .remove(&query)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::ForceDelete))?;
        Ok(removed > 0)
    }

    /// Clear the marker of a trashed record
    ///
    /// Returns the restored record, or `None` when no trashed record has that key.
    async fn restore(&mut self, key: Value) -> RepositoryResult<Option<Model>> {
        let Some(column) = self.soft_deletes().map(|s| s.column.clone()) else {
            return Err(RepositoryError::invariant_violation(
                RepositoryOperation::Restore,
                "repository does not support soft deletes",
            )
            .with_resource(self.schema().name.clone()));
        };

        let Some(mut model) = self.only_trashed().find(key).await? else {
            return Ok(None);
        };
        debug!(resource = %self.schema().name, "restore");
        model.set(column, Value::Null);
        self.update(model)
            .await
            .map(Some)
            .map_err(|e| e.with_operation(RepositoryOperation::Restore))
    }
}

impl<R: Repository + ?Sized> SoftDeleteExt for R {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Collection, CollectionRepository};
    use crate::repository::{RepositoryErrorKind, ResourceSchema};
    use serde_json::json;

    fn soft_repo() -> CollectionRepository {
        CollectionRepository::new(ResourceSchema::new("posts"), Collection::default())
            .with_soft_deletes(SoftDeletes::default())
    }

    fn scope_count(repo: &CollectionRepository) -> usize {
        let soft = SoftDeletes::default();
        repo.query()
            .wheres
            .iter()
            .filter(|w| **w == soft.active_scope() || **w == soft.trashed_scope())
            .count()
    }

    #[test]
    fn test_fresh_repository_is_active_scope() {
        let repo = soft_repo();
        assert_eq!(repo.query().wheres, vec![Where::is_null("deleted_at")]);
    }

    #[test]
    fn test_with_trashed_then_only_trashed() {
        let mut repo = soft_repo();
        repo.with_trashed().only_trashed();
        assert_eq!(scope_count(&repo), 1);
        assert!(repo.query().has_where(&Where::is_not_null("deleted_at")));
        assert!(!repo.query().has_where(&Where::is_null("deleted_at")));
    }

    #[test]
    fn test_scope_switching_keeps_other_conditions() {
        let mut repo = soft_repo();
        repo.where_(Where::eq("status", "draft"));
        repo.only_trashed().without_trashed().without_trashed();
        assert_eq!(
            repo.query().wheres,
            vec![Where::eq("status", "draft"), Where::is_null("deleted_at")]
        );
    }

    #[test]
    fn test_scopes_are_noops_without_soft_deletes() {
        let mut repo = CollectionRepository::new(ResourceSchema::new("tags"), Collection::default());
        repo.only_trashed().with_trashed().without_trashed();
        assert!(repo.query().wheres.is_empty());
    }

    #[tokio::test]
    async fn test_delete_restore_force_delete() {
        let mut repo = soft_repo();
        let stored = repo.store(Model::new("id").with("title", "a")).await.unwrap();
        let key = stored.key().cloned().unwrap();

        assert!(repo.delete(key.clone()).await.unwrap());
        assert!(repo.find(key.clone()).await.unwrap().is_none());

        let trashed = repo.only_trashed().all(vec![]).await.unwrap();
        assert_eq!(trashed.len(), 1);
        assert!(trashed[0].get("deleted_at").is_some_and(|v| v.is_string()));

        let restored = repo.restore(key.clone()).await.unwrap().unwrap();
        assert_eq!(restored.get("deleted_at"), Some(&Value::Null));
        assert!(repo.find(key.clone()).await.unwrap().is_some());

        repo.delete(key.clone()).await.unwrap();
        assert!(repo.force_delete(key.clone()).await.unwrap());
        assert!(repo.with_trashed().all(vec![]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_live_record_is_none() {
        let mut repo = soft_repo();
        let stored = repo.store(Model::new("id").with("title", "a")).await.unwrap();
        let key = stored.key().cloned().unwrap();
        assert!(repo.restore(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trashed_operations_without_soft_deletes() {
        let mut repo = CollectionRepository::new(ResourceSchema::new("tags"), Collection::default());
        let err = repo.force_delete(json!(1)).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvariantViolation);
        assert_eq!(err.operation, RepositoryOperation::ForceDelete);

        let err = repo.restore(json!(1)).await.unwrap_err();
        assert_eq!(err.operation, RepositoryOperation::Restore);
    }
}
