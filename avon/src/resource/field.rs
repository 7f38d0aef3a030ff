//! Resource fields
//!
//! A field names one payload entry and knows how to write it onto a model.
//! Plain attributes are copied as-is; belongs-to fields write their foreign
//! key; belongs-to-many fields are synced through the pivot after the model is
//! saved. Has-one and has-many fields are read-only.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::context::RequestContext;
use crate::error::Result;
use crate::model::Model;
use crate::relation::{Relation, RelationKind};

/// Custom fill: receives the field's payload value and the model being built
pub type FillFn = Arc<dyn Fn(&RequestContext, &Value, &mut Model) -> Result<()> + Send + Sync>;

/// A named field of a resource
///
/// # Example
///
/// ```rust
/// use avon::resource::Field;
///
/// let title = Field::attribute("title");
/// let slug = Field::attribute("slug").fill(|_, value, model| {
///     let slug = value.as_str().unwrap_or_default().to_lowercase().replace(' ', "-");
///     model.set("slug", slug);
///     Ok(())
/// });
/// let created = Field::attribute("created_at").readonly();
///
/// assert_eq!(title.name(), "title");
/// assert!(slug.as_relation().is_none());
/// assert!(created.is_readonly());
/// ```
#[derive(Clone)]
pub struct Field {
    name: String,
    relation: Option<Relation>,
    fill: Option<FillFn>,
    readonly: bool,
}

impl Field {
    /// A plain attribute
    pub fn attribute(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relation: None,
            fill: None,
            readonly: false,
        }
    }

    /// A relation field, named after the relation
    pub fn relation(relation: Relation) -> Self {
        let readonly = matches!(relation.kind, RelationKind::HasOne | RelationKind::HasMany);
        Self {
            name: relation.name.clone(),
            relation: Some(relation),
            fill: None,
            readonly,
        }
    }

    /// Replace the default fill
    #[must_use]
    pub fn fill<F>(mut self, fill: F) -> Self
    where
        F: Fn(&RequestContext, &Value, &mut Model) -> Result<()> + Send + Sync + 'static,
    {
        self.fill = Some(Arc::new(fill));
        self
    }

    /// Never written from payloads
    #[must_use]
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Load the relation on listings; no effect on attribute fields
    #[must_use]
    pub fn eager(mut self, eager: bool) -> Self {
        if let Some(ref mut relation) = self.relation {
            relation.eager = eager;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The relation behind a relation field
    pub fn as_relation(&self) -> Option<&Relation> {
        self.relation.as_ref()
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_eager(&self) -> bool {
        self.relation.as_ref().is_some_and(|r| r.eager)
    }

    /// Whether the field is written through a pivot after saving
    pub(crate) fn syncs_pivot(&self) -> bool {
        !self.readonly
            && self
                .relation
                .as_ref()
                .is_some_and(|r| r.kind == RelationKind::BelongsToMany)
    }

    /// Write this field's payload entry onto `model`
    ///
    /// Absent entries leave the model untouched.
    pub(crate) fn fill_model(
        &self,
        ctx: &RequestContext,
        payload: &Map<String, Value>,
        model: &mut Model,
    ) -> Result<()> {
        if self.readonly {
            return Ok(());
        }
        let Some(value) = payload.get(&self.name) else {
            return Ok(());
        };
        if let Some(ref fill) = self.fill {
            return fill(ctx, value, model);
        }
        match self.relation.as_ref().map(|r| (r.kind, &r.foreign_key)) {
            None => model.set(self.name.clone(), value.clone()),
            Some((RelationKind::BelongsTo, foreign_key)) => {
                model.set(foreign_key.clone(), value.clone())
            }
            Some(_) => {}
        }
        Ok(())
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("relation", &self.relation.as_ref().map(|r| r.kind))
            .field("custom_fill", &self.fill.is_some())
            .field("readonly", &self.readonly)
            .finish()
    }
}
