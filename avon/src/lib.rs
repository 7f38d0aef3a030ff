//! # avon
//!
//! Uniform resource repositories with soft deletes, batched relation loading
//! and declarative query matchers.
//!
//! ## Features
//!
//! - **Repository contract**: conditions, ordering, search, paging, store/update/delete and transactions
//! - **Soft deletes**: `with_trashed` / `only_trashed` scopes, restore and force delete
//! - **Relations**: belongs-to, has-one, has-many and belongs-to-many loaded in one query per relation
//! - **Pivot sync**: full-replace attach with pivot fields, inside a transaction when available
//! - **Matchers**: filters and orderings applied in registration order, only for keys present in the request
//! - **Backends**: shared in-memory collections, JSON files and PostgreSQL (`database` feature)
//!
//! ## Example
//!
//! ```rust
//! use avon::prelude::*;
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let users = ResourceSchema::new("users");
//! let user_rows = Collection::new(vec![
//!     json!({"id": 1, "name": "ada"}).as_object().cloned().unwrap(),
//! ]);
//! let users = RepositoryFactory::new(users.clone(), move || {
//!     CollectionRepository::new(users.clone(), user_rows.clone())
//! });
//!
//! let posts = ResourceSchema::new("posts");
//! let post_rows = Collection::default();
//! let resource = Resource::new(RepositoryFactory::new(posts.clone(), move || {
//!     CollectionRepository::new(posts.clone(), post_rows.clone())
//! }))
//! .field(Field::attribute("title"))
//! .field(Field::relation(Relation::belongs_to("author", users)).eager(true))
//! .filter(TextFilter::new("title"));
//!
//! let ctx = RequestContext::anonymous();
//! resource.store(&ctx, &json!({"title": "Notes", "author": 1})).await.unwrap();
//!
//! let page = resource
//!     .index(&ctx, &QueryParams::new().with_filter("title", "note"))
//!     .await
//!     .unwrap();
//! let post = serde_json::to_value(&page.items[0]).unwrap();
//! assert_eq!(post["author"]["name"], "ada");
//! # });
//! ```

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod observability;
pub mod query;
pub mod relation;
pub mod repository;
pub mod resource;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Config, PaginationConfig};
    pub use crate::error::{Error, ErrorResponse, Result};
    pub use crate::observability::init_tracing;

    pub use crate::context::RequestContext;
    pub use crate::model::{LooseKey, Model, PivotRow, Related};

    pub use crate::repository::{
        Direction, Page, Pagination, Query, Repository, RepositoryError, RepositoryErrorKind,
        RepositoryExt, RepositoryFactory, RepositoryOperation, RepositoryResult, ResourceSchema,
        SoftDeleteExt, SoftDeletes, Transactional, TransactionalExt, Where,
    };

    pub use crate::backend::{Collection, CollectionRepository, FileRepository};

    #[cfg(feature = "database")]
    pub use crate::backend::SqlRepository;

    pub use crate::relation::{PivotAttachment, Relation, RelationKind};

    pub use crate::query::{
        BooleanFilter, ColumnOrdering, ExactFilter, Filter, FilterFn, Matcher, Ordering, QueryParams,
        RangeFilter, SelectFilter, TextFilter, TrashedFilter,
    };

    pub use crate::resource::{Ability, Field, Policy, Resource, ResourceRegistry};

    pub use async_trait::async_trait;
}
