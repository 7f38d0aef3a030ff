//! JSON file backend
//!
//! Each resource is one file holding a JSON array of records. Every operation
//! reads the whole file; writes rewrite it. A missing file is an empty
//! resource. The read-modify-write cycle is not safe for concurrent writers.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::collection::no_transaction;
use super::memory;
use crate::config::StorageConfig;
use crate::model::{Attributes, Model};
use crate::repository::{
    scoped_query, Pagination, Query, Repository, RepositoryError, RepositoryOperation,
    RepositoryResult, ResourceSchema, SoftDeletes, Transactional,
};

/// Repository over a JSON array file
#[derive(Debug)]
pub struct FileRepository {
    schema: ResourceSchema,
    path: PathBuf,
    query: Query,
    soft_deletes: Option<SoftDeletes>,
    snapshot: Option<Vec<Attributes>>,
}

impl FileRepository {
    pub fn new(schema: ResourceSchema, path: impl Into<PathBuf>) -> Self {
        Self {
            schema,
            path: path.into(),
            query: Query::default(),
            soft_deletes: None,
            snapshot: None,
        }
    }

    /// Repository over `{data_dir}/{resource}.json`
    pub fn in_dir(schema: ResourceSchema, data_dir: impl AsRef<Path>) -> Self {
        let path = data_dir.as_ref().join(format!("{}.json", schema.name));
        Self::new(schema, path)
    }

    /// Repository under the configured `storage.data_dir`
    pub fn from_config(schema: ResourceSchema, storage: &StorageConfig) -> Self {
        Self::in_dir(schema, &storage.data_dir)
    }

    /// Enable soft deletes; the pending query starts in active scope
    #[must_use]
    pub fn with_soft_deletes(mut self, soft_deletes: SoftDeletes) -> Self {
        self.query = scoped_query(Some(&soft_deletes));
        self.soft_deletes = Some(soft_deletes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self, operation: RepositoryOperation) -> RepositoryResult<Vec<Attributes>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                RepositoryError::serialization_error(operation, e.to_string())
                    .with_resource(&self.schema.name)
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io_error(operation, e)),
        }
    }

    async fn save(
        &self,
        operation: RepositoryOperation,
        records: &[Attributes],
    ) -> RepositoryResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(operation, e))?;
        }
        let bytes = serde_json::to_vec_pretty(records).map_err(|e| {
            RepositoryError::serialization_error(operation, e.to_string())
                .with_resource(&self.schema.name)
        })?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| self.io_error(operation, e))
    }

    fn io_error(&self, operation: RepositoryOperation, err: std::io::Error) -> RepositoryError {
        RepositoryError::database_error(
            operation,
            format!("{}: {}", self.path.display(), err),
        )
        .with_resource(&self.schema.name)
    }
}

#[async_trait]
impl Repository for FileRepository {
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
        let records = self.load(RepositoryOperation::All).await?;
        Ok(memory::select(&records, query, pagination)
            .into_iter()
            .map(|r| Model::from_attributes(&self.schema.primary_key, r))
            .collect())
    }

    async fn count(&mut self, query: &Query) -> RepositoryResult<u64> {
        let records = self.load(RepositoryOperation::Count).await?;
        Ok(memory::count(&records, query))
    }

    async fn insert(&mut self, model: Model) -> RepositoryResult<Model> {
        let mut records = self.load(RepositoryOperation::Store).await?;
        let stored = memory::insert(&self.schema, &mut records, model)?;
        self.save(RepositoryOperation::Store, &records).await?;
        Ok(stored)
    }

    async fn replace(&mut self, model: Model) -> RepositoryResult<Option<Model>> {
        let mut records = self.load(RepositoryOperation::Update).await?;
        let replaced = memory::replace(&self.schema, &mut records, model)?;
        if replaced.is_some() {
            self.save(RepositoryOperation::Update, &records).await?;
        }
        Ok(replaced)
    }

    async fn remove(&mut self, query: &Query) -> RepositoryResult<u64> {
        let mut records = self.load(RepositoryOperation::Delete).await?;
        let removed = memory::remove(&mut records, query);
        if removed > 0 {
            self.save(RepositoryOperation::Delete, &records).await?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl Transactional for FileRepository {
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
        debug!(resource = %self.schema.name, path = %self.path.display(), "begin");
        self.snapshot = Some(self.load(RepositoryOperation::Transaction).await?);
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
        self.save(RepositoryOperation::Transaction, &snapshot).await
    }
}
