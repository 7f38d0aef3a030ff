//! End-to-end scenarios across repositories, relations and resources

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use avon::prelude::*;
use avon::relation;
use serde_json::{json, Value};

fn rows(value: Value) -> Vec<serde_json::Map<String, Value>> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_object().cloned()).collect())
        .unwrap_or_default()
}

fn factory(schema: ResourceSchema, collection: Collection) -> RepositoryFactory {
    RepositoryFactory::new(schema.clone(), move || {
        CollectionRepository::new(schema.clone(), collection.clone())
    })
}

fn soft_factory(schema: ResourceSchema, collection: Collection) -> RepositoryFactory {
    RepositoryFactory::new(schema.clone(), move || {
        CollectionRepository::new(schema.clone(), collection.clone())
            .with_soft_deletes(SoftDeletes::default())
    })
}

fn without_ids(records: Vec<serde_json::Map<String, Value>>) -> Vec<Value> {
    records
        .into_iter()
        .map(|mut r| {
            r.remove("id");
            Value::Object(r)
        })
        .collect()
}

#[tokio::test]
async fn test_has_many_batches_and_fills_every_parent() {
    let posts_schema = ResourceSchema::new("posts");
    let comments = Collection::new(rows(json!([
        {"id": 10, "post_id": 1, "body": "first"},
        {"id": 11, "post_id": "1", "body": "second"},
        {"id": 12, "post_id": 9, "body": "orphan"}
    ])));
    let relation = Relation::has_many(
        "comments",
        &posts_schema,
        factory(ResourceSchema::new("comments"), comments),
    );

    let mut parents: Vec<Model> = (1..=3).map(|id| Model::new("id").with("id", id)).collect();
    relation::load(&RequestContext::anonymous(), [&relation], &mut parents)
        .await
        .unwrap();

    let counts: Vec<usize> = parents
        .iter()
        .map(|p| p.relation("comments").map_or(usize::MAX, |r| r.models().len()))
        .collect();
    assert_eq!(counts, vec![2, 0, 0]);

    let first = serde_json::to_value(&parents[0]).unwrap();
    assert_eq!(first["comments"][0]["id"], 10);
    assert_eq!(first["comments"][1]["id"], 11);
    assert_eq!(serde_json::to_value(&parents[2]).unwrap()["comments"], json!([]));
}

#[tokio::test]
async fn test_soft_delete_lifecycle() {
    let posts = Collection::default();
    let mut repo = CollectionRepository::new(ResourceSchema::new("posts"), posts.clone())
        .with_soft_deletes(SoftDeletes::default());

    let a = repo.store(Model::new("id").with("title", "A")).await.unwrap();
    repo.store(Model::new("id").with("title", "B")).await.unwrap();
    let a_key = a.key().cloned().unwrap();

    assert!(repo.delete(a_key.clone()).await.unwrap());

    let titles = |models: Vec<Model>| -> Vec<Value> {
        models.iter().filter_map(|m| m.get("title").cloned()).collect()
    };
    assert_eq!(titles(repo.all(vec![]).await.unwrap()), vec![json!("B")]);
    assert_eq!(
        titles(repo.with_trashed().all(vec![]).await.unwrap()),
        vec![json!("A"), json!("B")]
    );
    assert_eq!(
        titles(repo.only_trashed().all(vec![]).await.unwrap()),
        vec![json!("A")]
    );
    // the later scope wins
    assert_eq!(
        titles(repo.with_trashed().only_trashed().all(vec![]).await.unwrap()),
        vec![json!("A")]
    );
    assert!(repo.find(a_key.clone()).await.unwrap().is_none());

    let restored = repo.restore(a_key.clone()).await.unwrap().unwrap();
    assert_eq!(restored.get("deleted_at"), Some(&Value::Null));
    assert_eq!(repo.all(vec![]).await.unwrap().len(), 2);

    assert!(repo.force_delete(a_key.clone()).await.unwrap());
    assert!(repo.with_trashed().find(a_key).await.unwrap().is_none());
    assert_eq!(posts.len().await, 1);
}

#[tokio::test]
async fn test_attach_through_resource_is_idempotent() {
    let posts_schema = ResourceSchema::new("posts");
    let tags = factory(
        ResourceSchema::new("tags"),
        Collection::new(rows(json!([{"id": 1, "name": "rust"}, {"id": 2, "name": "go"}]))),
    );
    let pivot_rows = Collection::default();
    let pivot = factory(ResourceSchema::new("post_tag"), pivot_rows.clone());

    let resource = Resource::new(factory(
        posts_schema.clone(),
        Collection::new(rows(json!([{"id": 5, "title": "hello"}]))),
    ))
    .field(Field::attribute("title"))
    .field(Field::relation(
        Relation::belongs_to_many("tags", &posts_schema, tags, pivot)
            .pivot_keys("resource_foreign_key", "id")
            .foreign_key("related_id")
            .pivot_fields(["order"]),
    ));

    let ctx = RequestContext::anonymous();
    let payload = json!({"tags": [{"id": 1, "order": 10}]});
    resource.update(&ctx, json!(5), &payload).await.unwrap();
    resource.update(&ctx, json!("5"), &payload).await.unwrap();

    assert_eq!(
        without_ids(pivot_rows.records().await),
        vec![json!({"resource_foreign_key": 5, "related_id": 1, "order": 10})]
    );

    let shown = serde_json::to_value(resource.show(&ctx, json!(5)).await.unwrap()).unwrap();
    assert_eq!(shown["tags"].as_array().map(Vec::len), Some(1));
    assert_eq!(shown["tags"][0]["name"], "rust");
    assert_eq!(shown["tags"][0]["pivot"], json!({"order": 10}));
}

#[tokio::test]
async fn test_absent_filter_is_never_applied() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let resource = Resource::new(factory(
        ResourceSchema::new("posts"),
        Collection::new(rows(json!([{"id": 1, "status": "draft"}, {"id": 2, "status": "live"}]))),
    ))
    .filter(FilterFn::new("mine", move |_, _, _| {
        counted.fetch_add(1, AtomicOrdering::SeqCst);
    }))
    .filter(ExactFilter::new("status"));

    let ctx = RequestContext::anonymous();
    let page = resource
        .index(&ctx, &QueryParams::new().with_filter("status", "live"))
        .await
        .unwrap();
    assert_eq!(page.count, 1);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);

    resource
        .index(&ctx, &QueryParams::new().with_filter("mine", true))
        .await
        .unwrap();
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
}

#[tokio::test]
async fn test_filters_append_in_registration_order() {
    let matcher = Matcher::new()
        .filter(ExactFilter::new("a"))
        .filter(TextFilter::new("b"))
        .ordering(ColumnOrdering::new("b"))
        .ordering(ColumnOrdering::new("a"));
    let params = QueryParams::from_pairs([
        ("orders[a]", "desc"),
        ("filters[b]", "x"),
        ("orders[b]", "asc"),
        ("filters[a]", "1"),
    ]);

    let mut repo = CollectionRepository::new(ResourceSchema::new("rows"), Collection::default());
    repo.where_(Where::eq("tenant", 7));
    matcher.apply(&RequestContext::anonymous(), &mut repo, &params);

    let keys: Vec<&str> = repo.query().wheres.iter().map(|w| w.key.as_str()).collect();
    assert_eq!(keys, vec!["tenant", "a", "b"]);
    let orders: Vec<(&str, Direction)> = repo
        .query()
        .orders
        .iter()
        .map(|o| (o.key.as_str(), o.direction))
        .collect();
    assert_eq!(orders, vec![("b", Direction::Asc), ("a", Direction::Desc)]);
}

#[tokio::test]
async fn test_trashed_filter_through_index() {
    let posts = Collection::new(rows(json!([
        {"id": 1, "title": "kept", "deleted_at": null},
        {"id": 2, "title": "gone", "deleted_at": "2024-01-01T00:00:00Z"}
    ])));
    let resource = Resource::new(soft_factory(ResourceSchema::new("posts"), posts))
        .field(Field::attribute("title"))
        .filter(TrashedFilter::new());

    assert_eq!(index_count(&resource, QueryParams::new()).await, 1);
    assert_eq!(
        index_count(&resource, QueryParams::new().with_filter("trashed", "with")).await,
        2
    );
    assert_eq!(
        index_count(&resource, QueryParams::new().with_filter("trashed", "only")).await,
        1
    );
}

async fn index_count(resource: &Resource, params: QueryParams) -> u64 {
    resource
        .index(&RequestContext::anonymous(), &params)
        .await
        .unwrap()
        .count
}

#[tokio::test]
async fn test_transaction_rollback_discards_writes() {
    let tags = Collection::new(rows(json!([{"id": 1, "name": "kept"}])));
    let mut repo = CollectionRepository::new(ResourceSchema::new("tags"), tags.clone());

    let err = repo
        .transaction(|repo| {
            Box::pin(async move {
                repo.store(Model::new("id").with("name", "temp")).await?;
                repo.delete(json!(1)).await?;
                Err::<(), _>(RepositoryError::validation_failed("abort"))
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
    assert!(!repo.in_transaction());
    assert_eq!(
        tags.records().await,
        rows(json!([{"id": 1, "name": "kept"}]))
    );
}

#[tokio::test]
async fn test_policy_denies_before_touching_storage() {
    let posts = Collection::default();
    let resource = Resource::new(factory(ResourceSchema::new("posts"), posts.clone()))
        .field(Field::attribute("title"))
        .policy(Policy::new().allow(Ability::Create, |ctx, _| !ctx.is_anonymous()));

    let err = resource
        .store(&RequestContext::anonymous(), &json!({"title": "x"}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
    assert!(posts.is_empty().await);

    resource
        .store(&RequestContext::with_actor(1_i64), &json!({"title": "x"}))
        .await
        .unwrap();
    assert_eq!(posts.len().await, 1);
}
