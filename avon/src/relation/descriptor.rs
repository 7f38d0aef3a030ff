//! Relation descriptors
//!
//! Key columns default from the schemas involved and can always be overridden:
//!
//! | kind            | `foreign_key` lives on | default `foreign_key`        | default `owner_key`    |
//! |-----------------|------------------------|------------------------------|------------------------|
//! | belongs-to      | parent                 | `{related singular}_{pk}`    | related primary key    |
//! | has-one / many  | related                | `{parent singular}_{pk}`     | parent primary key     |
//! | belongs-to-many | pivot                  | `{related singular}_{pk}`    | related primary key    |
//!
//! For belongs-to-many the pivot additionally points back at the parent through
//! `resource_foreign_key` (`{parent singular}_{pk}`), matched against the
//! parent's `resource_owner_key` (parent primary key).

use std::fmt;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::model::Model;
use crate::repository::{RepositoryFactory, ResourceSchema};
use crate::resource::{Ability, Policy};

/// Read-side authorization callback: `false` drops the related record
pub type Authorizer = Arc<dyn Fn(&RequestContext, &Model) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    BelongsToMany,
}

impl RelationKind {
    /// Whether the relation attaches a sequence
    pub const fn is_many(&self) -> bool {
        matches!(self, Self::HasMany | Self::BelongsToMany)
    }
}

/// Pivot side of a belongs-to-many relation
#[derive(Debug, Clone)]
pub struct PivotDescriptor {
    pub repository: RepositoryFactory,
    /// Pivot column holding the parent's key
    pub resource_foreign_key: String,
    /// Parent column the pivot points at
    pub resource_owner_key: String,
    /// Pivot columns copied from attach requests and exposed on related models
    pub fields: Vec<String>,
}

/// A named relation from one resource to another
///
/// # Example
///
/// ```rust
/// use avon::backend::{Collection, CollectionRepository};
/// use avon::relation::{Relation, RelationKind};
/// use avon::repository::{RepositoryFactory, ResourceSchema};
///
/// fn factory(name: &str) -> RepositoryFactory {
///     let schema = ResourceSchema::new(name);
///     let collection = Collection::default();
///     RepositoryFactory::new(schema.clone(), move || {
///         CollectionRepository::new(schema.clone(), collection.clone())
///     })
/// }
///
/// let posts = ResourceSchema::new("posts");
/// let comments = Relation::has_many("comments", &posts, factory("comments"));
/// assert_eq!(comments.kind, RelationKind::HasMany);
/// assert_eq!(comments.foreign_key, "post_id");
///
/// let tags = Relation::belongs_to_many("tags", &posts, factory("tags"), factory("post_tag"))
///     .pivot_fields(["order"]);
/// let pivot = tags.pivot.as_ref().unwrap();
/// assert_eq!((tags.foreign_key.as_str(), pivot.resource_foreign_key.as_str()), ("tag_id", "post_id"));
/// ```
#[derive(Clone)]
pub struct Relation {
    pub name: String,
    pub kind: RelationKind,
    pub related: RepositoryFactory,
    pub foreign_key: String,
    pub owner_key: String,
    pub pivot: Option<PivotDescriptor>,
    /// Resolved by the eager loader on every listing
    pub eager: bool,
    pub authorize: Option<Authorizer>,
}

impl Relation {
    fn new(
        name: impl Into<String>,
        kind: RelationKind,
        related: RepositoryFactory,
        foreign_key: String,
        owner_key: String,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            related,
            foreign_key,
            owner_key,
            pivot: None,
            eager: false,
            authorize: None,
        }
    }

    /// The parent holds `foreign_key` pointing at the related `owner_key`
    pub fn belongs_to(name: impl Into<String>, related: RepositoryFactory) -> Self {
        let foreign_key = related.schema().default_foreign_key();
        let owner_key = related.schema().primary_key.clone();
        Self::new(name, RelationKind::BelongsTo, related, foreign_key, owner_key)
    }

    /// One related record holds `foreign_key` pointing at the parent
    pub fn has_one(
        name: impl Into<String>,
        parent: &ResourceSchema,
        related: RepositoryFactory,
    ) -> Self {
        Self::new(
            name,
            RelationKind::HasOne,
            related,
            parent.default_foreign_key(),
            parent.primary_key.clone(),
        )
    }

    /// Every related record holding `foreign_key` pointing at the parent
    pub fn has_many(
        name: impl Into<String>,
        parent: &ResourceSchema,
        related: RepositoryFactory,
    ) -> Self {
        Self::new(
            name,
            RelationKind::HasMany,
            related,
            parent.default_foreign_key(),
            parent.primary_key.clone(),
        )
    }

    /// Related records joined through pivot rows
    pub fn belongs_to_many(
        name: impl Into<String>,
        parent: &ResourceSchema,
        related: RepositoryFactory,
        pivot: RepositoryFactory,
    ) -> Self {
        let foreign_key = related.schema().default_foreign_key();
        let owner_key = related.schema().primary_key.clone();
        let mut relation = Self::new(
            name,
            RelationKind::BelongsToMany,
            related,
            foreign_key,
            owner_key,
        );
        relation.pivot = Some(PivotDescriptor {
            repository: pivot,
            resource_foreign_key: parent.default_foreign_key(),
            resource_owner_key: parent.primary_key.clone(),
            fields: Vec::new(),
        });
        relation
    }

    #[must_use]
    pub fn foreign_key(mut self, foreign_key: impl Into<String>) -> Self {
        self.foreign_key = foreign_key.into();
        self
    }

    #[must_use]
    pub fn owner_key(mut self, owner_key: impl Into<String>) -> Self {
        self.owner_key = owner_key.into();
        self
    }

    /// Override the pivot's parent-side keys; ignored on relations without a pivot
    #[must_use]
    pub fn pivot_keys(
        mut self,
        resource_foreign_key: impl Into<String>,
        resource_owner_key: impl Into<String>,
    ) -> Self {
        if let Some(ref mut pivot) = self.pivot {
            pivot.resource_foreign_key = resource_foreign_key.into();
            pivot.resource_owner_key = resource_owner_key.into();
        }
        self
    }

    #[must_use]
    pub fn pivot_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(ref mut pivot) = self.pivot {
            pivot.fields = fields.into_iter().map(Into::into).collect();
        }
        self
    }

    #[must_use]
    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    /// Drop related records for which `authorize` returns `false`
    #[must_use]
    pub fn authorize<F>(mut self, authorize: F) -> Self
    where
        F: Fn(&RequestContext, &Model) -> bool + Send + Sync + 'static,
    {
        self.authorize = Some(Arc::new(authorize));
        self
    }

    /// Authorize related records with a policy's `View` ability
    #[must_use]
    pub fn authorize_with(self, policy: Policy) -> Self {
        self.authorize(move |ctx, model| policy.check(ctx, Ability::View, Some(model)))
    }

    pub(crate) fn is_visible(&self, ctx: &RequestContext, model: &Model) -> bool {
        self.authorize
            .as_ref()
            .map_or(true, |authorize| authorize(ctx, model))
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("related", &self.related.schema().name)
            .field("foreign_key", &self.foreign_key)
            .field("owner_key", &self.owner_key)
            .field("pivot", &self.pivot)
            .field("eager", &self.eager)
            .field("authorized", &self.authorize.is_some())
            .finish()
    }
}
