//! Uniform repository contract over any storage backend
//!
//! # Features
//!
//! - **Conditions**: [`Where`] / [`Order`] accumulate on a repository's pending [`Query`]
//! - **Contract**: [`Repository`] primitives plus [`RepositoryExt`] terminal operations
//! - **Soft deletes**: [`SoftDeleteExt`] scope switching, `force_delete`, `restore`
//! - **Transactions**: [`Transactional`] / [`TransactionalExt`]
//! - **Factories**: [`RepositoryFactory`] builds a fresh repository per lookup
//!
//! # Example
//!
//! ```rust
//! use avon::backend::{Collection, CollectionRepository};
//! use avon::model::Model;
//! use avon::repository::{RepositoryExt, ResourceSchema, SoftDeleteExt, SoftDeletes};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let mut posts = CollectionRepository::new(ResourceSchema::new("posts"), Collection::default())
//!     .with_soft_deletes(SoftDeletes::default());
//!
//! let post = posts.store(Model::new("id").with("title", "Hello")).await.unwrap();
//! let key = post.key().cloned().unwrap();
//! posts.delete(key.clone()).await.unwrap();
//!
//! assert!(posts.find(key.clone()).await.unwrap().is_none());
//! assert_eq!(posts.only_trashed().all(vec![]).await.unwrap().len(), 1);
//! # });
//! ```

mod condition;
mod error;
mod factory;
mod pagination;
mod schema;
mod soft_delete;
mod traits;

// Re-export all public types
pub use condition::{Direction, Operator, Order, Query, QueryTransform, Where, WhereValue};
pub use error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
pub use factory::RepositoryFactory;
pub use pagination::{Page, Pagination};
pub use schema::{KeyKind, ResourceSchema};
pub use soft_delete::{scoped_query, SoftDeleteExt, SoftDeletes};
pub use traits::{
    is_not_found, Repository, RepositoryExt, RepositoryResult, Transactional, TransactionalExt,
};
