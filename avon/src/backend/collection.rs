//! In-memory collection backend

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::memory;
use crate::model::{Attributes, Model};
use crate::repository::{
    scoped_query, Pagination, Query, Repository, RepositoryError, RepositoryOperation,
    RepositoryResult, ResourceSchema, SoftDeletes, Transactional,
};

/// Shared, in-memory record storage
///
/// Cloning a `Collection` shares the underlying records, so every repository
/// built from the same collection sees the same data.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    records: Arc<RwLock<Vec<Attributes>>>,
}

impl Collection {
    pub fn new(records: Vec<Attributes>) -> Self {
        Self {
            records: Arc::new(RwLock::new(records)),
        }
    }

    /// Seed a collection from models, keeping only their persisted attributes
    pub fn from_models(models: impl IntoIterator<Item = Model>) -> Self {
        Self::new(models.into_iter().map(Model::into_attributes).collect())
    }

    /// Copy of every stored record
    pub async fn records(&self) -> Vec<Attributes> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn restore(&self, records: Vec<Attributes>) {
        *self.records.write().await = records;
    }
}

/// Repository over a [`Collection`]
///
/// Transactions snapshot the collection on `begin` and put the snapshot back on
/// `rollback`. Writes made meanwhile by other repositories sharing the
/// collection are rolled back too.
#[derive(Debug)]
pub struct CollectionRepository {
    schema: ResourceSchema,
    collection: Collection,
    query: Query,
    soft_deletes: Option<SoftDeletes>,
    snapshot: Option<Vec<Attributes>>,
}

impl CollectionRepository {
    pub fn new(schema: ResourceSchema, collection: Collection) -> Self {
        Self {
            schema,
            collection,
            query: Query::default(),
            soft_deletes: None,
            snapshot: None,
        }
    }

    /// Enable soft deletes; the pending query starts in active scope
    #[must_use]
    pub fn with_soft_deletes(mut self, soft_deletes: SoftDeletes) -> Self {
        self.query = scoped_query(Some(&soft_deletes));
        self.soft_deletes = Some(soft_deletes);
        self
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    fn to_models(&self, records: Vec<Attributes>) -> Vec<Model> {
        records
            .into_iter()
            .map(|r| Model::from_attributes(&self.schema.primary_key, r))
            .collect()
    }
}

#[async_trait]
impl Repository for CollectionRepository {
    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    fn query(&self) -> &Query {
        &self.query
    }

    fn query_mut(&mut self) -> &mut Query {
        &mut self.query
    }

    fn soft_deletes(&self) -> Option<&SoftDeletes> {
        self.soft_deletes.as_ref()
    }

    fn as_transactional(&mut self) -> Option<&mut dyn Transactional> {
        Some(self)
    }

    async fn fetch(
        &mut self,
        query: &Query,
        pagination: Option<Pagination>,
    ) -> RepositoryResult<Vec<Model>> {
        let records = self.collection.records.read().await;
        let selected = memory::select(&records, query, pagination);
        drop(records);
        Ok(self.to_models(selected))
    }

    async fn count(&mut self, query: &Query) -> RepositoryResult<u64> {
        let records = self.collection.records.read().await;
        Ok(memory::count(&records, query))
    }

    async fn insert(&mut self, model: Model) -> RepositoryResult<Model> {
        let mut records = self.collection.records.write().await;
        memory::insert(&self.schema, &mut records, model)
    }

    async fn replace(&mut self, model: Model) -> RepositoryResult<Option<Model>> {
        let mut records = self.collection.records.write().await;
        memory::replace(&self.schema, &mut records, model)
    }

    async fn remove(&mut self, query: &Query) -> RepositoryResult<u64> {
        let mut records = self.collection.records.write().await;
        Ok(memory::remove(&mut records, query))
    }
}

#[async_trait]
impl Transactional for CollectionRepository {
    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    async fn begin(&mut self) -> RepositoryResult<()> {
        if self.snapshot.is_some() {
            return Err(RepositoryError::invariant_violation(
                RepositoryOperation::Transaction,
                "a transaction is already active",
            )
            .with_resource(&self.schema.name));
        }
        debug!(resource = %self.schema.name, "begin");
        self.snapshot = Some(self.collection.records().await);
        Ok(())
    }

    async fn commit(&mut self) -> RepositoryResult<()> {
        if self.snapshot.take().is_none() {
            return Err(no_transaction(&self.schema));
        }
        debug!(resource = %self.schema.name, "commit");
        Ok(())
    }

    async fn rollback(&mut self) -> RepositoryResult<()> {
        let Some(snapshot) = self.snapshot.take() else {
            return Err(no_transaction(&self.schema));
        };
        debug!(resource = %self.schema.name, "rollback");
        self.collection.restore(snapshot).await;
        Ok(())
    }
}

pub(super) fn no_transaction(schema: &ResourceSchema) -> RepositoryError {
    RepositoryError::invariant_violation(RepositoryOperation::Transaction, "no active transaction")
        .with_resource(&schema.name)
}
