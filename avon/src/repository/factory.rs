//! Repository factories
//!
//! Relations and resources never hold a repository; they hold a factory and
//! build a fresh repository (with a fresh query) for every lookup.

use std::fmt;
use std::sync::Arc;

use super::schema::ResourceSchema;
use super::traits::Repository;

type BuildFn = dyn Fn() -> Box<dyn Repository> + Send + Sync;

/// Builds repositories for one resource
///
/// # Example
///
/// ```rust
/// use avon::backend::{Collection, CollectionRepository};
/// use avon::repository::{RepositoryFactory, ResourceSchema};
///
/// let schema = ResourceSchema::new("comments");
/// let comments = Collection::default();
/// let factory = RepositoryFactory::new(schema.clone(), move || {
///     CollectionRepository::new(schema.clone(), comments.clone())
/// });
///
/// assert_eq!(factory.schema().name, "comments");
/// let _repo = factory.create();
/// ```
#[derive(Clone)]
pub struct RepositoryFactory {
    schema: ResourceSchema,
    build: Arc<BuildFn>,
}

impl RepositoryFactory {
    pub fn new<R, F>(schema: ResourceSchema, build: F) -> Self
    where
        R: Repository + 'static,
        F: Fn() -> R + Send + Sync + 'static,
    {
        Self {
            schema,
            build: Arc::new(move || Box::new(build()) as Box<dyn Repository>),
        }
    }

    pub fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    /// A new repository with a fresh query
    pub fn create(&self) -> Box<dyn Repository> {
        (self.build)()
    }
}

impl fmt::Debug for RepositoryFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryFactory")
            .field("schema", &self.schema.name)
            .finish_non_exhaustive()
    }
}
