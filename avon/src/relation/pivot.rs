//! Belongs-to-many write path
//!
//! Attaching replaces the parent's whole pivot set: every existing row for the
//! parent is deleted, then one row per requested (and existing) related record
//! is inserted. Two concurrent syncs for the same parent can interleave.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::debug;

use super::descriptor::{PivotDescriptor, Relation, RelationKind};
use crate::model::{display_key, LooseKey, Model};
use crate::repository::{
    Query, Repository, RepositoryError, RepositoryExt, RepositoryOperation, RepositoryResult,
    TransactionalExt, Where, WhereValue,
};

/// One requested attachment: the related key plus pivot attributes
#[derive(Debug, Clone, PartialEq)]
pub struct PivotAttachment {
    pub id: Value,
    pub fields: Map<String, Value>,
}

impl PivotAttachment {
    pub fn new(id: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Read `{"id": …, …fields}` or a bare key
    ///
    /// Objects without an `id` yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Object(object) => {
                let mut fields = object.clone();
                let id = fields.remove("id")?;
                Some(Self { id, fields })
            }
            Value::Null | Value::Array(_) => None,
            scalar => Some(Self::new(scalar.clone())),
        }
    }

    /// Read a payload array; entries that are not attachments are skipped
    pub fn list_from_json(value: &Value) -> Vec<Self> {
        value
            .as_array()
            .map(|items| items.iter().filter_map(Self::from_json).collect())
            .unwrap_or_default()
    }
}

/// Full-replace pivot synchronization for one belongs-to-many relation
#[derive(Debug, Clone, Copy)]
pub struct PivotWriter<'r> {
    relation: &'r Relation,
    pivot: &'r PivotDescriptor,
}

impl<'r> PivotWriter<'r> {
    /// Fails with `InvariantViolation` unless `relation` is belongs-to-many
    pub fn new(relation: &'r Relation) -> RepositoryResult<Self> {
        match (relation.kind, relation.pivot.as_ref()) {
            (RelationKind::BelongsToMany, Some(pivot)) => Ok(Self { relation, pivot }),
            _ => Err(RepositoryError::invariant_violation(
                RepositoryOperation::Attach,
                "only belongs-to-many relations can be attached",
            )
            .with_relation(relation.name.clone())),
        }
    }

    /// Replace the pivot rows of `parent` with `attachments`
    ///
    /// Unknown related keys are dropped; repeated keys keep their first entry.
    /// Only declared pivot fields are copied onto the rows. Runs in a
    /// transaction when the pivot repository supports one. Returns the stored
    /// pivot rows.
    pub async fn sync(
        &self,
        parent: &Model,
        attachments: Vec<PivotAttachment>,
    ) -> RepositoryResult<Vec<Model>> {
        self.write(parent, attachments)
            .await
            .map_err(|e| {
                e.with_operation(RepositoryOperation::Attach)
                    .with_relation(self.relation.name.clone())
            })
    }

    async fn write(
        &self,
        parent: &Model,
        attachments: Vec<PivotAttachment>,
    ) -> RepositoryResult<Vec<Model>> {
        let owner = parent
            .get(&self.pivot.resource_owner_key)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| {
                RepositoryError::invariant_violation(
                    RepositoryOperation::Attach,
                    format!("parent has no {}", self.pivot.resource_owner_key),
                )
            })?;

        let mut seen = HashSet::new();
        let attachments: Vec<PivotAttachment> = attachments
            .into_iter()
            .filter(|a| LooseKey::from_value(&a.id).is_some_and(|k| seen.insert(k)))
            .collect();

        let existing = self.existing_keys(&attachments).await?;
        let rows: Vec<Model> = attachments
            .into_iter()
            .filter_map(|attachment| {
                let key = LooseKey::from_value(&attachment.id)?;
                let related_key = existing.get(&key)?.clone();
                Some(self.row(&owner, related_key, attachment.fields))
            })
            .collect();

        debug!(
            relation = %self.relation.name,
            owner = %display_key(&owner),
            rows = rows.len(),
            "sync pivot"
        );

        let column = self.pivot.resource_foreign_key.clone();
        let mut repo = self.pivot.repository.create();
        if let Some(tx) = repo.as_transactional() {
            if !tx.in_transaction() {
                return tx
                    .transaction(move |tx| Box::pin(replace_rows(tx, column, owner, rows)))
                    .await;
            }
        }
        replace_rows(repo.as_mut(), column, owner, rows).await
    }

    /// Requested keys that exist in the related repository, mapped to their stored value
    async fn existing_keys(
        &self,
        attachments: &[PivotAttachment],
    ) -> RepositoryResult<HashMap<LooseKey, Value>> {
        if attachments.is_empty() {
            return Ok(HashMap::new());
        }
        let owner_key = &self.relation.owner_key;
        let ids: Vec<WhereValue> = attachments.iter().map(|a| WhereValue::from_json(&a.id)).collect();
        let related = self
            .relation
            .related
            .create()
            .all(vec![Where::in_values(owner_key.clone(), ids)])
            .await?;
        Ok(related
            .into_iter()
            .filter_map(|model| {
                let value = model.get(owner_key)?.clone();
                Some((LooseKey::from_value(&value)?, value))
            })
            .collect())
    }

    fn row(&self, owner: &Value, related_key: Value, mut fields: Map<String, Value>) -> Model {
        let mut row = Model::new(self.pivot.repository.schema().primary_key.clone());
        row.set(self.pivot.resource_foreign_key.clone(), owner.clone());
        row.set(self.relation.foreign_key.clone(), related_key);
        for field in &self.pivot.fields {
            if let Some(value) = fields.remove(field) {
                row.set(field.clone(), value);
            }
        }
        row
    }
}

impl Relation {
    /// Replace the pivot rows of `parent`; see [`PivotWriter::sync`]
    pub async fn sync(
        &self,
        parent: &Model,
        attachments: Vec<PivotAttachment>,
    ) -> RepositoryResult<Vec<Model>> {
        PivotWriter::new(self)?.sync(parent, attachments).await
    }
}

async fn replace_rows<R: Repository + ?Sized>(
    repo: &mut R,
    column: String,
    owner: Value,
    rows: Vec<Model>,
) -> RepositoryResult<Vec<Model>> {
    let query = Query {
        wheres: vec![Where::eq(column, owner)],
        ..Query::default()
    };
    let removed = repo.remove(&query).await?;
    debug!(removed, "pivot rows cleared");

    let mut stored = Vec::with_capacity(rows.len());
    for row in rows {
        stored.push(repo.store(row).await?);
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Collection, CollectionRepository};
    use crate::repository::{RepositoryErrorKind, RepositoryFactory, ResourceSchema};
    use serde_json::json;

    struct Fixture {
        relation: Relation,
        pivot: Collection,
    }

    fn fixture(pivot_rows: Value) -> Fixture {
        let tags_schema = ResourceSchema::new("tags");
        let tags = Collection::new(
            json!([{"id": 1, "name": "rust"}, {"id": 2, "name": "go"}])
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r.as_object().cloned().unwrap())
                .collect(),
        );
        let pivot_schema = ResourceSchema::new("post_tag");
        let pivot = Collection::new(
            pivot_rows
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r.as_object().cloned().unwrap())
                .collect(),
        );
        let related = RepositoryFactory::new(tags_schema.clone(), move || {
            CollectionRepository::new(tags_schema.clone(), tags.clone())
        });
        let pivot_for_factory = pivot.clone();
        let pivot_factory = RepositoryFactory::new(pivot_schema.clone(), move || {
            CollectionRepository::new(pivot_schema.clone(), pivot_for_factory.clone())
        });
        let relation =
            Relation::belongs_to_many("tags", &ResourceSchema::new("posts"), related, pivot_factory)
                .foreign_key("related_id")
                .pivot_keys("resource_foreign_key", "id")
                .pivot_fields(["order"]);
        Fixture { relation, pivot }
    }

    fn strip_ids(rows: Vec<serde_json::Map<String, Value>>) -> Vec<Value> {
        rows.into_iter()
            .map(|mut r| {
                r.remove("id");
                Value::Object(r)
            })
            .collect()
    }

    #[test]
    fn test_attachment_from_json() {
        let parsed = PivotAttachment::list_from_json(&json!([
            {"id": 1, "order": 10},
            "2",
            {"order": 3},
            null
        ]));
        assert_eq!(
            parsed,
            vec![
                PivotAttachment::new(1).field("order", 10),
                PivotAttachment::new("2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_sync_replaces_rows() {
        let fx = fixture(json!([
            {"id": 1, "resource_foreign_key": 5, "related_id": 2, "order": 1},
            {"id": 2, "resource_foreign_key": 6, "related_id": 2, "order": 1}
        ]));
        let parent = Model::new("id").with("id", 5);

        fx.relation
            .sync(&parent, vec![PivotAttachment::new(1).field("order", 10)])
            .await
            .unwrap();

        let rows = strip_ids(fx.pivot.records().await);
        assert_eq!(
            rows,
            vec![
                json!({"resource_foreign_key": 6, "related_id": 2, "order": 1}),
                json!({"resource_foreign_key": 5, "related_id": 1, "order": 10}),
            ]
        );
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let fx = fixture(json!([]));
        let parent = Model::new("id").with("id", 5);
        let payload = vec![
            PivotAttachment::new(1).field("order", 1),
            PivotAttachment::new("2").field("order", 2),
        ];

        fx.relation.sync(&parent, payload.clone()).await.unwrap();
        let first = strip_ids(fx.pivot.records().await);
        fx.relation.sync(&parent, payload).await.unwrap();
        let second = strip_ids(fx.pivot.records().await);

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_duplicate_and_undeclared_are_dropped() {
        let fx = fixture(json!([]));
        let parent = Model::new("id").with("id", 5);

        let stored = fx
            .relation
            .sync(
                &parent,
                vec![
                    PivotAttachment::new(2).field("order", 1).field("note", "x"),
                    PivotAttachment::new("2").field("order", 9),
                    PivotAttachment::new(99),
                ],
            )
            .await
            .unwrap();

        assert_eq!(stored.len(), 1);
        assert_eq!(
            strip_ids(fx.pivot.records().await),
            vec![json!({"resource_foreign_key": 5, "related_id": 2, "order": 1})]
        );
    }

    #[tokio::test]
    async fn test_empty_sync_detaches_everything() {
        let fx = fixture(json!([
            {"id": 1, "resource_foreign_key": "5", "related_id": 1}
        ]));
        let parent = Model::new("id").with("id", 5);

        let stored = fx.relation.sync(&parent, Vec::new()).await.unwrap();
        assert!(stored.is_empty());
        assert!(fx.pivot.is_empty().await);
    }

    #[tokio::test]
    async fn test_sync_requires_pivot_and_parent_key() {
        let fx = fixture(json!([]));
        let err = fx
            .relation
            .sync(&Model::new("id"), vec![PivotAttachment::new(1)])
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvariantViolation);
        assert_eq!(err.relation.as_deref(), Some("tags"));

        let author = Relation::belongs_to("author", fx.relation.related.clone());
        let err = author
            .sync(&Model::new("id").with("id", 1), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.operation, RepositoryOperation::Attach);
    }
}
