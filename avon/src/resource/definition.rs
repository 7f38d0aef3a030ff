//! Resource definition and its actions

use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::field::Field;
use super::policy::{Ability, Policy};
use crate::config::PaginationConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::model::{display_key, Model};
use crate::query::{Filter, Matcher, Ordering, QueryParams};
use crate::relation::{self, PivotAttachment, Relation};
use crate::repository::{
    Page, Query, Repository, RepositoryError, RepositoryExt, RepositoryFactory, RepositoryResult,
    ResourceSchema, SoftDeleteExt, TransactionalExt, Where,
};

/// A resource: a repository factory plus the fields, handlers and policy around it
///
/// Every action builds a fresh repository from the factory.
///
/// # Example
///
/// ```rust
/// use avon::backend::{Collection, CollectionRepository};
/// use avon::context::RequestContext;
/// use avon::query::{ExactFilter, QueryParams};
/// use avon::repository::{RepositoryFactory, ResourceSchema};
/// use avon::resource::{Field, Resource};
/// use serde_json::json;
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let schema = ResourceSchema::new("posts");
/// let posts = Collection::default();
/// let resource = Resource::new(RepositoryFactory::new(schema.clone(), move || {
///     CollectionRepository::new(schema.clone(), posts.clone())
/// }))
/// .field(Field::attribute("title"))
/// .field(Field::attribute("status"))
/// .filter(ExactFilter::new("status"));
///
/// let ctx = RequestContext::anonymous();
/// resource.store(&ctx, &json!({"title": "a", "status": "draft"})).await.unwrap();
/// resource.store(&ctx, &json!({"title": "b", "status": "published"})).await.unwrap();
///
/// let page = resource
///     .index(&ctx, &QueryParams::new().with_filter("status", "published"))
///     .await
///     .unwrap();
/// assert_eq!(page.count, 1);
/// assert_eq!(page.items[0].get("title"), Some(&json!("b")));
/// # });
/// ```
#[derive(Clone)]
pub struct Resource {
    repository: RepositoryFactory,
    fields: Vec<Field>,
    matcher: Matcher,
    policy: Policy,
    pagination: PaginationConfig,
}

impl Resource {
    pub fn new(repository: RepositoryFactory) -> Self {
        Self {
            repository,
            fields: Vec::new(),
            matcher: Matcher::new(),
            policy: Policy::new(),
            pagination: PaginationConfig::default(),
        }
    }

    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.matcher = self.matcher.filter(filter);
        self
    }

    #[must_use]
    pub fn ordering(mut self, ordering: impl Ordering + 'static) -> Self {
        self.matcher = self.matcher.ordering(ordering);
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn pagination(mut self, pagination: PaginationConfig) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn name(&self) -> &str {
        &self.schema().name
    }

    pub fn schema(&self) -> &ResourceSchema {
        self.repository.schema()
    }

    pub fn repository(&self) -> &RepositoryFactory {
        &self.repository
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Relations declared through fields, in declaration order
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.fields.iter().filter_map(Field::as_relation)
    }

    fn not_found(&self, key: &Value) -> Error {
        Error::NotFound(format!("{} {}", self.schema().singular, display_key(key)))
    }

    /// One page of records
    ///
    /// Filters and orderings are matched against `params`, the search text and
    /// page are applied, then eager relations are loaded onto the page.
    pub async fn index(&self, ctx: &RequestContext, params: &QueryParams) -> Result<Page<Model>> {
        self.policy.authorize(ctx, Ability::ViewAny, None)?;

        let mut repo = self.repository.create();
        self.matcher.apply(ctx, repo.as_mut(), params);
        let per_page = params.items_per_page(&self.pagination);
        let mut page = repo
            .search(params.search_text().unwrap_or_default(), params.page_number(), per_page)
            .await?;

        relation::load(ctx, self.relations().filter(|r| r.eager), &mut page.items).await?;
        debug!(resource = %self.name(), count = page.count, items = page.items.len(), "index");
        Ok(page)
    }

    /// One record with every relation loaded
    pub async fn show(&self, ctx: &RequestContext, key: Value) -> Result<Model> {
        let mut repo = self.repository.create();
        let model = repo
            .find(key.clone())
            .await?
            .ok_or_else(|| self.not_found(&key))?;
        self.policy.authorize(ctx, Ability::View, Some(&model))?;

        let mut models = vec![model];
        relation::load(ctx, self.relations(), &mut models).await?;
        models.pop().ok_or_else(|| self.not_found(&key))
    }

    /// Create a record from `payload`
    ///
    /// Fields fill the new model one after another in declaration order; pivot
    /// relations are synced once the record has its key. A failed sync leaves
    /// no record behind.
    pub async fn store(&self, ctx: &RequestContext, payload: &Value) -> Result<Model> {
        self.policy.authorize(ctx, Ability::Create, None)?;
        let payload = payload_object(payload)?;

        let mut model = Model::new(self.schema().primary_key.clone());
        self.fill(ctx, payload, &mut model)?;
        let syncs = self.pivot_syncs(ctx, &model, payload)?;

        let mut repo = self.repository.create();
        let stored = persist(repo.as_mut(), Write::Insert(model), syncs).await?;
        info!(resource = %self.name(), key = ?stored.key(), "stored");
        Ok(stored)
    }

    /// Update an existing record from `payload`; absent entries are kept
    ///
    /// The record and its pivot rows change together or not at all.
    pub async fn update(&self, ctx: &RequestContext, key: Value, payload: &Value) -> Result<Model> {
        let payload = payload_object(payload)?;
        let mut repo = self.repository.create();
        let original = repo
            .find(key.clone())
            .await?
            .ok_or_else(|| self.not_found(&key))?;
        self.policy.authorize(ctx, Ability::Update, Some(&original))?;

        let mut model = original.clone();
        self.fill(ctx, payload, &mut model)?;
        let syncs = self.pivot_syncs(ctx, &original, payload)?;

        let updated = persist(repo.as_mut(), Write::Replace { model, original }, syncs).await?;
        info!(resource = %self.name(), key = %display_key(&key), "updated");
        Ok(updated)
    }

    /// Delete a record; soft-deleting repositories only mark it
    pub async fn destroy(&self, ctx: &RequestContext, key: Value) -> Result<()> {
        let mut repo = self.repository.create();
        let model = repo
            .find(key.clone())
            .await?
            .ok_or_else(|| self.not_found(&key))?;
        self.policy.authorize(ctx, Ability::Delete, Some(&model))?;

        repo.delete(key.clone()).await?;
        info!(resource = %self.name(), key = %display_key(&key), "deleted");
        Ok(())
    }

    /// Physically delete a record, trashed or not
    pub async fn force_destroy(&self, ctx: &RequestContext, key: Value) -> Result<()> {
        let mut repo = self.repository.create();
        let model = repo
            .with_trashed()
            .find(key.clone())
            .await?
            .ok_or_else(|| self.not_found(&key))?;
        self.policy.authorize(ctx, Ability::ForceDelete, Some(&model))?;

        repo.force_delete(key.clone()).await?;
        info!(resource = %self.name(), key = %display_key(&key), "force deleted");
        Ok(())
    }

    /// Bring a trashed record back
    pub async fn restore(&self, ctx: &RequestContext, key: Value) -> Result<Model> {
        let mut repo = self.repository.create();
        let model = repo
            .only_trashed()
            .find(key.clone())
            .await?
            .ok_or_else(|| self.not_found(&key))?;
        self.policy.authorize(ctx, Ability::Restore, Some(&model))?;

        let restored = repo
            .restore(key.clone())
            .await?
            .ok_or_else(|| self.not_found(&key))?;
        info!(resource = %self.name(), key = %display_key(&key), "restored");
        Ok(restored)
    }

    fn fill(&self, ctx: &RequestContext, payload: &Map<String, Value>, model: &mut Model) -> Result<()> {
        for field in &self.fields {
            field.fill_model(ctx, payload, model)?;
        }
        Ok(())
    }

    /// Pivot relations named in `payload`, checked against `Ability::Attach`
    /// before anything is written
    fn pivot_syncs(
        &self,
        ctx: &RequestContext,
        parent: &Model,
        payload: &Map<String, Value>,
    ) -> Result<Vec<PivotSync>> {
        let mut syncs = Vec::new();
        for field in self.fields.iter().filter(|f| f.syncs_pivot()) {
            let (Some(relation), Some(value)) = (field.as_relation(), payload.get(field.name()))
            else {
                continue;
            };
            self.policy.authorize(ctx, Ability::Attach, Some(parent))?;
            syncs.push((relation.clone(), PivotAttachment::list_from_json(value)));
        }
        Ok(syncs)
    }
}

type PivotSync = (Relation, Vec<PivotAttachment>);

enum Write {
    Insert(Model),
    Replace { model: Model, original: Model },
}

/// Save the record, then sync its pivots
///
/// Inside a transaction when the repository offers one. Otherwise a failed
/// sync is compensated: an inserted record is removed, a replaced one written
/// back.
async fn persist(
    repo: &mut dyn Repository,
    write: Write,
    syncs: Vec<PivotSync>,
) -> RepositoryResult<Model> {
    if let Some(tx) = repo.as_transactional() {
        if !tx.in_transaction() {
            return tx
                .transaction(move |tx| Box::pin(save_with_pivots(tx, write, syncs)))
                .await;
        }
    }

    let (saved, undo) = match write {
        Write::Insert(model) => (repo.store(model).await?, None),
        Write::Replace { model, original } => (repo.update(model).await?, Some(original)),
    };
    let synced = sync_all(&saved, syncs).await;
    let Err(err) = synced else {
        return Ok(saved);
    };

    let compensation = match undo {
        None => match saved.key() {
            Some(key) => {
                let query = Query {
                    wheres: vec![Where::eq(saved.key_name().to_string(), key.clone())],
                    ..Query::default()
                };
                repo.remove(&query).await.map(|_| ())
            }
            None => Ok(()),
        },
        Some(original) => repo.replace(original).await.map(|_| ()),
    };
    if let Err(undo_err) = compensation {
        warn!(error = %undo_err, "could not undo write after failed pivot sync");
    }
    Err(err)
}

async fn save_with_pivots<R: Repository + ?Sized>(
    repo: &mut R,
    write: Write,
    syncs: Vec<PivotSync>,
) -> RepositoryResult<Model> {
    let saved = match write {
        Write::Insert(model) => repo.store(model).await?,
        Write::Replace { model, .. } => repo.update(model).await?,
    };
    sync_all(&saved, syncs).await?;
    Ok(saved)
}

async fn sync_all(parent: &Model, syncs: Vec<PivotSync>) -> RepositoryResult<()> {
    for (relation, attachments) in syncs {
        relation.sync(parent, attachments).await?;
    }
    Ok(())
}

fn payload_object(payload: &Value) -> Result<&Map<String, Value>> {
    payload.as_object().ok_or_else(|| {
        Error::Repository(RepositoryError::validation_failed(
            "payload must be a JSON object",
        ))
    })
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name())
            .field("fields", &self.fields)
            .field("matcher", &self.matcher)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Collection, CollectionRepository};
    use crate::query::{ColumnOrdering, TrashedFilter};
    use crate::repository::{
        Pagination, RepositoryErrorKind, RepositoryOperation, SoftDeletes,
    };
    use async_trait::async_trait;
    use serde_json::json;

    fn posts(collection: Collection) -> Resource {
        let schema = ResourceSchema::new("posts").searchable(["title"]);
        Resource::new(RepositoryFactory::new(schema.clone(), move || {
            CollectionRepository::new(schema.clone(), collection.clone())
                .with_soft_deletes(SoftDeletes::default())
        }))
        .field(Field::attribute("title"))
        .filter(TrashedFilter::new())
        .ordering(ColumnOrdering::new("title"))
    }

    fn titles(page: &Page<Model>) -> Vec<Value> {
        page.items
            .iter()
            .filter_map(|m| m.get("title").cloned())
            .collect()
    }

    #[tokio::test]
    async fn test_index_search_order_and_count() {
        let resource = posts(Collection::default());
        let ctx = RequestContext::anonymous();
        for title in ["rust b", "go", "rust a", "rust c"] {
            resource.store(&ctx, &json!({"title": title})).await.unwrap();
        }

        let params = QueryParams::new()
            .with_search("rust")
            .with_order("title", "asc")
            .with_per_page(2);
        let page = resource.index(&ctx, &params).await.unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(titles(&page), vec![json!("rust a"), json!("rust b")]);
    }

    #[tokio::test]
    async fn test_destroy_then_restore_through_trashed_filter() {
        let resource = posts(Collection::default());
        let ctx = RequestContext::anonymous();
        let stored = resource.store(&ctx, &json!({"title": "x"})).await.unwrap();
        let key = stored.key().cloned().unwrap();

        resource.destroy(&ctx, key.clone()).await.unwrap();
        assert_eq!(resource.index(&ctx, &QueryParams::new()).await.unwrap().count, 0);
        let trashed = QueryParams::from_pairs([("trashed", "only")]);
        assert_eq!(resource.index(&ctx, &trashed).await.unwrap().count, 1);

        let restored = resource.restore(&ctx, key.clone()).await.unwrap();
        assert_eq!(restored.get("deleted_at"), Some(&Value::Null));
        assert!(resource.show(&ctx, key).await.is_ok());
    }

    #[tokio::test]
    async fn test_force_destroy_reaches_trashed_records() {
        let collection = Collection::default();
        let resource = posts(collection.clone());
        let ctx = RequestContext::anonymous();
        let key = resource
            .store(&ctx, &json!({"title": "x"}))
            .await
            .unwrap()
            .key()
            .cloned()
            .unwrap();

        resource.destroy(&ctx, key.clone()).await.unwrap();
        resource.force_destroy(&ctx, key.clone()).await.unwrap();
        assert!(collection.is_empty().await);
        assert!(resource.show(&ctx, key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_keeps_absent_fields() {
        let resource = posts(Collection::default()).field(Field::attribute("body"));
        let ctx = RequestContext::anonymous();
        let key = resource
            .store(&ctx, &json!({"title": "x", "body": "b", "ignored": 1}))
            .await
            .unwrap()
            .key()
            .cloned()
            .unwrap();

        let updated = resource.update(&ctx, key, &json!({"title": "y"})).await.unwrap();
        assert_eq!(updated.get("title"), Some(&json!("y")));
        assert_eq!(updated.get("body"), Some(&json!("b")));
        assert!(updated.get("ignored").is_none());
    }

    #[tokio::test]
    async fn test_policy_denials() {
        let resource = posts(Collection::default()).policy(
            Policy::new()
                .deny(Ability::Create)
                .allow(Ability::View, |_, m| {
                    m.and_then(|m| m.get("title")) != Some(&json!("secret"))
                }),
        );
        let ctx = RequestContext::anonymous();
        let err = resource.store(&ctx, &json!({"title": "x"})).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let mut repo = resource.repository().create();
        let secret = repo
            .store(Model::new("id").with("title", "secret").with("deleted_at", Value::Null))
            .await
            .unwrap();
        let err = resource
            .show(&ctx, secret.key().cloned().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_payload_must_be_object() {
        let resource = posts(Collection::default());
        let err = resource
            .store(&RequestContext::anonymous(), &json!(["x"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Repository(ref e) if e.kind == RepositoryErrorKind::ValidationFailed
        ));
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let resource = posts(Collection::default());
        let ctx = RequestContext::anonymous();
        assert!(resource.show(&ctx, json!(9)).await.unwrap_err().is_not_found());
        assert!(resource
            .update(&ctx, json!(9), &json!({}))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(resource.restore(&ctx, json!(9)).await.unwrap_err().is_not_found());
    }

    /// Pivot storage that rejects every call
    struct Unavailable {
        schema: ResourceSchema,
        query: Query,
    }

    impl Unavailable {
        fn error(operation: RepositoryOperation) -> RepositoryError {
            RepositoryError::new(operation, RepositoryErrorKind::ConnectionFailed, "pivot store down")
        }
    }

    #[async_trait]
    impl Repository for Unavailable {
        fn schema(&self) -> &ResourceSchema {
            &self.schema
        }

        fn query(&self) -> &Query {
            &self.query
        }

        fn query_mut(&mut self) -> &mut Query {
            &mut self.query
        }

        async fn fetch(&mut self, _: &Query, _: Option<Pagination>) -> RepositoryResult<Vec<Model>> {
            Err(Self::error(RepositoryOperation::All))
        }

        async fn count(&mut self, _: &Query) -> RepositoryResult<u64> {
            Err(Self::error(RepositoryOperation::Count))
        }

        async fn insert(&mut self, _: Model) -> RepositoryResult<Model> {
            Err(Self::error(RepositoryOperation::Store))
        }

        async fn replace(&mut self, _: Model) -> RepositoryResult<Option<Model>> {
            Err(Self::error(RepositoryOperation::Update))
        }

        async fn remove(&mut self, _: &Query) -> RepositoryResult<u64> {
            Err(Self::error(RepositoryOperation::Delete))
        }
    }

    /// A collection repository without transaction support
    struct Plain(CollectionRepository);

    #[async_trait]
    impl Repository for Plain {
        fn schema(&self) -> &ResourceSchema {
            self.0.schema()
        }

        fn query(&self) -> &Query {
            self.0.query()
        }

        fn query_mut(&mut self) -> &mut Query {
            self.0.query_mut()
        }

        async fn fetch(
            &mut self,
            query: &Query,
            pagination: Option<Pagination>,
        ) -> RepositoryResult<Vec<Model>> {
            self.0.fetch(query, pagination).await
        }

        async fn count(&mut self, query: &Query) -> RepositoryResult<u64> {
            self.0.count(query).await
        }

        async fn insert(&mut self, model: Model) -> RepositoryResult<Model> {
            self.0.insert(model).await
        }

        async fn replace(&mut self, model: Model) -> RepositoryResult<Option<Model>> {
            self.0.replace(model).await
        }

        async fn remove(&mut self, query: &Query) -> RepositoryResult<u64> {
            self.0.remove(query).await
        }
    }

    fn collection(value: Value) -> Collection {
        Collection::new(
            value
                .as_array()
                .map(|rows| rows.iter().filter_map(|r| r.as_object().cloned()).collect())
                .unwrap_or_default(),
        )
    }

    fn tags_field(posts_schema: &ResourceSchema, pivot: RepositoryFactory) -> Field {
        let tags_schema = ResourceSchema::new("tags");
        let tags = collection(json!([{"id": 1, "name": "rust"}]));
        let related = RepositoryFactory::new(tags_schema.clone(), move || {
            CollectionRepository::new(tags_schema.clone(), tags.clone())
        });
        Field::relation(Relation::belongs_to_many("tags", posts_schema, related, pivot))
    }

    fn unavailable_pivot() -> RepositoryFactory {
        let schema = ResourceSchema::new("post_tag");
        RepositoryFactory::new(schema.clone(), move || Unavailable {
            schema: schema.clone(),
            query: Query::default(),
        })
    }

    fn tagged_posts(posts: Collection, pivot: RepositoryFactory, transactional: bool) -> Resource {
        let schema = ResourceSchema::new("posts");
        let factory_schema = schema.clone();
        let repository = if transactional {
            RepositoryFactory::new(schema.clone(), move || {
                CollectionRepository::new(factory_schema.clone(), posts.clone())
            })
        } else {
            RepositoryFactory::new(schema.clone(), move || {
                Plain(CollectionRepository::new(factory_schema.clone(), posts.clone()))
            })
        };
        Resource::new(repository)
            .field(Field::attribute("title"))
            .field(tags_field(&schema, pivot))
    }

    fn is_attach_failure(err: &Error) -> bool {
        matches!(
            err,
            Error::Repository(e)
                if e.operation == RepositoryOperation::Attach
                    && e.kind == RepositoryErrorKind::ConnectionFailed
        )
    }

    #[tokio::test]
    async fn test_denied_attach_writes_nothing() {
        let posts = Collection::default();
        let pivot = Collection::default();
        let pivot_schema = ResourceSchema::new("post_tag");
        let pivot_rows = pivot.clone();
        let pivot_factory = RepositoryFactory::new(pivot_schema.clone(), move || {
            CollectionRepository::new(pivot_schema.clone(), pivot_rows.clone())
        });
        let resource = tagged_posts(posts.clone(), pivot_factory, true)
            .policy(Policy::new().deny(Ability::Attach));
        let ctx = RequestContext::anonymous();

        let err = resource
            .store(&ctx, &json!({"title": "x", "tags": [{"id": 1}]}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert!(posts.is_empty().await);
        assert!(pivot.is_empty().await);

        // no tags in the payload, nothing to attach
        resource.store(&ctx, &json!({"title": "x"})).await.unwrap();
        assert_eq!(posts.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_sync_rolls_back_store_and_update() {
        let posts = collection(json!([{"id": 5, "title": "old"}]));
        let resource = tagged_posts(posts.clone(), unavailable_pivot(), true);
        let ctx = RequestContext::anonymous();

        let err = resource
            .store(&ctx, &json!({"title": "x", "tags": [{"id": 1}]}))
            .await
            .unwrap_err();
        assert!(is_attach_failure(&err));

        let err = resource
            .update(&ctx, json!(5), &json!({"title": "new", "tags": [1]}))
            .await
            .unwrap_err();
        assert!(is_attach_failure(&err));

        let records: Vec<Value> = posts.records().await.into_iter().map(Value::Object).collect();
        assert_eq!(records, vec![json!({"id": 5, "title": "old"})]);
    }

    #[tokio::test]
    async fn test_failed_sync_is_undone_without_transactions() {
        let posts = collection(json!([{"id": 5, "title": "old"}]));
        let resource = tagged_posts(posts.clone(), unavailable_pivot(), false);
        let ctx = RequestContext::anonymous();

        let err = resource
            .store(&ctx, &json!({"title": "x", "tags": [{"id": 1}]}))
            .await
            .unwrap_err();
        assert!(is_attach_failure(&err));
        assert_eq!(posts.len().await, 1);

        let err = resource
            .update(&ctx, json!(5), &json!({"title": "new", "tags": [1]}))
            .await
            .unwrap_err();
        assert!(is_attach_failure(&err));
        let mut repo = resource.repository().create();
        let stored = repo.find(json!(5)).await.unwrap().unwrap();
        assert_eq!(stored.get("title"), Some(&json!("old")));
    }
}
