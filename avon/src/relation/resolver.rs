//! Batched relation resolution
//!
//! [`Relation::lookup`] reads everything a batch of parents needs with one
//! query (two for pivots) and returns an [`Attachment`]; the attachment is then
//! applied to the same parents. Keys match loosely, so `1` and `"1"` pair up.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use super::descriptor::{Relation, RelationKind};
use crate::context::RequestContext;
use crate::model::{LooseKey, Model, PivotRow, Related};
use crate::repository::{
    RepositoryError, RepositoryExt, RepositoryOperation, RepositoryResult, Where, WhereValue,
};

/// Related models for each parent of a lookup, in parent order
#[derive(Debug, Clone)]
pub struct Attachment {
    relation: String,
    related: Vec<Related>,
}

impl Attachment {
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Per-parent attachments, aligned with the looked-up parents
    pub fn related(&self) -> &[Related] {
        &self.related
    }

    /// Attach to the parents the lookup ran over
    pub fn apply(self, parents: &mut [Model]) {
        for (parent, related) in parents.iter_mut().zip(self.related) {
            parent.set_relation(self.relation.clone(), related);
        }
    }
}

/// Distinct non-null keys in first-seen order
fn distinct_keys(models: &[Model], column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    models
        .iter()
        .filter_map(|m| m.get(column))
        .filter(|v| LooseKey::from_value(v).is_some_and(|k| seen.insert(k)))
        .cloned()
        .collect()
}

fn key_of(model: &Model, column: &str) -> Option<LooseKey> {
    model.get(column).and_then(LooseKey::from_value)
}

impl Relation {
    /// Load the related records for `parents`
    ///
    /// Every parent gets an entry: the match or `None` for belongs-to and
    /// has-one, a possibly empty sequence for has-many and belongs-to-many.
    /// No query runs when the parents carry no keys.
    pub async fn lookup(
        &self,
        ctx: &RequestContext,
        parents: &[Model],
    ) -> RepositoryResult<Attachment> {
        let related = match self.kind {
            RelationKind::BelongsTo => self.lookup_belongs_to(ctx, parents).await,
            RelationKind::HasOne | RelationKind::HasMany => self.lookup_has(ctx, parents).await,
            RelationKind::BelongsToMany => self.lookup_through_pivot(ctx, parents).await,
        }
        .map_err(|e| {
            e.with_operation(RepositoryOperation::Resolve)
                .with_relation(self.name.clone())
        })?;
        Ok(Attachment {
            relation: self.name.clone(),
            related,
        })
    }

    /// Related records whose `column` is one of `keys`, authorized for `ctx`
    async fn fetch_related(
        &self,
        ctx: &RequestContext,
        column: &str,
        keys: Vec<Value>,
    ) -> RepositoryResult<Vec<Model>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        debug!(relation = %self.name, keys = keys.len(), "resolve");
        let mut repo = self.related.create();
        let values: Vec<WhereValue> = keys.iter().map(WhereValue::from_json).collect();
        let mut models = repo.all(vec![Where::in_values(column, values)]).await?;
        models.retain(|m| self.is_visible(ctx, m));
        Ok(models)
    }

    async fn lookup_belongs_to(
        &self,
        ctx: &RequestContext,
        parents: &[Model],
    ) -> RepositoryResult<Vec<Related>> {
        let keys = distinct_keys(parents, &self.foreign_key);
        let related = self.fetch_related(ctx, &self.owner_key, keys).await?;

        let mut index: HashMap<LooseKey, Model> = HashMap::new();
        for model in related {
            if let Some(key) = key_of(&model, &self.owner_key) {
                index.entry(key).or_insert(model);
            }
        }
        Ok(parents
            .iter()
            .map(|parent| {
                let found = key_of(parent, &self.foreign_key).and_then(|k| index.get(&k).cloned());
                Related::One(found.map(Box::new))
            })
            .collect())
    }

    async fn lookup_has(
        &self,
        ctx: &RequestContext,
        parents: &[Model],
    ) -> RepositoryResult<Vec<Related>> {
        let keys = distinct_keys(parents, &self.owner_key);
        let related = self.fetch_related(ctx, &self.foreign_key, keys).await?;

        let mut groups: HashMap<LooseKey, Vec<Model>> = HashMap::new();
        for model in related {
            if let Some(key) = key_of(&model, &self.foreign_key) {
                groups.entry(key).or_default().push(model);
            }
        }
        Ok(parents
            .iter()
            .map(|parent| {
                let group = key_of(parent, &self.owner_key)
                    .and_then(|k| groups.get(&k).cloned())
                    .unwrap_or_default();
                if self.kind == RelationKind::HasOne {
                    Related::One(group.into_iter().next().map(Box::new))
                } else {
                    Related::Many(group)
                }
            })
            .collect())
    }

    async fn lookup_through_pivot(
        &self,
        ctx: &RequestContext,
        parents: &[Model],
    ) -> RepositoryResult<Vec<Related>> {
        let Some(ref pivot) = self.pivot else {
            return Err(RepositoryError::invariant_violation(
                RepositoryOperation::Resolve,
                "belongs-to-many relation without a pivot",
            ));
        };

        let owner_keys = distinct_keys(parents, &pivot.resource_owner_key);
        let rows = if owner_keys.is_empty() {
            Vec::new()
        } else {
            debug!(relation = %self.name, keys = owner_keys.len(), "resolve pivot");
            let values: Vec<WhereValue> = owner_keys.iter().map(WhereValue::from_json).collect();
            pivot
                .repository
                .create()
                .all(vec![Where::in_values(pivot.resource_foreign_key.clone(), values)])
                .await?
        };

        let related_keys = distinct_keys(&rows, &self.foreign_key);
        let related = self.fetch_related(ctx, &self.owner_key, related_keys).await?;
        let mut index: HashMap<LooseKey, Model> = HashMap::new();
        for model in related {
            if let Some(key) = key_of(&model, &self.owner_key) {
                index.entry(key).or_insert(model);
            }
        }

        let mut by_parent: HashMap<LooseKey, Vec<Model>> = HashMap::new();
        for row in rows {
            let (Some(parent_key), Some(related_key)) = (
                key_of(&row, &pivot.resource_foreign_key),
                key_of(&row, &self.foreign_key),
            ) else {
                continue;
            };
            if let Some(model) = index.get(&related_key) {
                let mut model = model.clone();
                model.set_pivot(PivotRow::new(row.into_attributes(), pivot.fields.clone()));
                by_parent.entry(parent_key).or_default().push(model);
            }
        }

        Ok(parents
            .iter()
            .map(|parent| {
                let models = key_of(parent, &pivot.resource_owner_key)
                    .and_then(|k| by_parent.get(&k).cloned())
                    .unwrap_or_default();
                Related::Many(models)
            })
            .collect())
    }
}
