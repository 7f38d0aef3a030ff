//! PostgreSQL backend
//!
//! Translates the pending query into one parameterized statement per
//! operation. Rows come back as JSON objects; the key is generated by the
//! database default when the record has none.

mod builder;
mod params;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Postgres, Row, Transaction, TypeInfo};
use tracing::debug;

pub use builder::{ColumnTypes, QueryBuf};
pub use params::SqlParam;

use crate::config::DatabaseConfig;
use crate::model::Model;
use crate::repository::{
    scoped_query, Pagination, Query, Repository, RepositoryError, RepositoryErrorKind,
    RepositoryOperation, RepositoryResult, ResourceSchema, SoftDeletes, Transactional,
};

/// Open a connection pool
pub async fn connect(config: &DatabaseConfig) -> RepositoryResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Transaction, e))?;
    tracing::info!(
        url = %crate::error::sanitize_url(&config.url),
        "Database connection pool created: max={}, min={}",
        config.max_connections,
        config.min_connections
    );
    Ok(pool)
}

/// Repository over one PostgreSQL table
///
/// The table is the schema's resource name (`schema.table` is accepted).
pub struct SqlRepository {
    schema: ResourceSchema,
    pool: PgPool,
    query: Query,
    soft_deletes: Option<SoftDeletes>,
    transaction: Option<Transaction<'static, Postgres>>,
    column_types: Option<ColumnTypes>,
}

impl SqlRepository {
    pub fn new(schema: ResourceSchema, pool: PgPool) -> Self {
        Self {
            schema,
            pool,
            query: Query::default(),
            soft_deletes: None,
            transaction: None,
            column_types: None,
        }
    }

    /// Enable soft deletes; the pending query starts in active scope
    #[must_use]
    pub fn with_soft_deletes(mut self, soft_deletes: SoftDeletes) -> Self {
        self.query = scoped_query(Some(&soft_deletes));
        self.soft_deletes = Some(soft_deletes);
        self
    }

    /// Skip the catalog lookup by supplying column types up front
    #[must_use]
    pub fn with_column_types(mut self, column_types: ColumnTypes) -> Self {
        self.column_types = Some(column_types);
        self
    }

    async fn column_types(&mut self) -> RepositoryResult<ColumnTypes> {
        if let Some(ref types) = self.column_types {
            return Ok(types.clone());
        }
        let (table_schema, table) = match self.schema.name.split_once('.') {
            Some((s, t)) => (Some(s.to_string()), t.to_string()),
            None => (None, self.schema.name.clone()),
        };
        let rows = sqlx::query(
            "SELECT column_name::text, udt_name::text FROM information_schema.columns \
             WHERE table_name = $1 AND table_schema = COALESCE($2, current_schema())",
        )
        .bind(table)
        .bind(table_schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.error(RepositoryOperation::All, e))?;

        let mut types = ColumnTypes::new();
        for row in rows {
            let name: String = row
                .try_get(0)
                .map_err(|e| self.error(RepositoryOperation::All, e))?;
            let ty: String = row
                .try_get(1)
                .map_err(|e| self.error(RepositoryOperation::All, e))?;
            types.insert(name, ty);
        }
        self.column_types = Some(types.clone());
        Ok(types)
    }

    async fn fetch_rows(
        &mut self,
        buf: &QueryBuf,
        operation: RepositoryOperation,
    ) -> RepositoryResult<Vec<PgRow>> {
        debug!(resource = %self.schema.name, sql = %buf.sql, "query");
        let query = params::bind_all(sqlx::query(&buf.sql), &buf.params);
        let result = match self.transaction.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await,
            None => query.fetch_all(&self.pool).await,
        };
        result.map_err(|e| self.error(operation, e))
    }

    async fn execute(
        &mut self,
        buf: &QueryBuf,
        operation: RepositoryOperation,
    ) -> RepositoryResult<u64> {
        debug!(resource = %self.schema.name, sql = %buf.sql, "execute");
        let query = params::bind_all(sqlx::query(&buf.sql), &buf.params);
        let result = match self.transaction.as_mut() {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(&self.pool).await,
        };
        result
            .map(|done| done.rows_affected())
            .map_err(|e| self.error(operation, e))
    }

    fn to_model(&self, row: &PgRow, operation: RepositoryOperation) -> RepositoryResult<Model> {
        let attributes = row_to_json(row).map_err(|message| {
            RepositoryError::serialization_error(operation, message).with_resource(&self.schema.name)
        })?;
        Ok(Model::from_attributes(&self.schema.primary_key, attributes))
    }

    fn error(&self, operation: RepositoryOperation, err: sqlx::Error) -> RepositoryError {
        map_sqlx_error(operation, err).with_resource(&self.schema.name)
    }
}

#[async_trait]
impl Repository for SqlRepository {
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
        let types = self.column_types().await?;
        let buf = builder::select(&self.schema.name, &types, query, pagination);
        let rows = self.fetch_rows(&buf, RepositoryOperation::All).await?;
        rows.iter()
            .map(|r| self.to_model(r, RepositoryOperation::All))
            .collect()
    }

    async fn count(&mut self, query: &Query) -> RepositoryResult<u64> {
        let types = self.column_types().await?;
        let buf = builder::count(&self.schema.name, &types, query);
        let rows = self.fetch_rows(&buf, RepositoryOperation::Count).await?;
        let total: i64 = match rows.first() {
            Some(row) => row
                .try_get(0)
                .map_err(|e| self.error(RepositoryOperation::Count, e))?,
            None => 0,
        };
        Ok(u64::try_from(total).unwrap_or_default())
    }

    async fn insert(&mut self, model: Model) -> RepositoryResult<Model> {
        let types = self.column_types().await?;
        let mut attributes = model.into_attributes();
        if attributes
            .get(&self.schema.primary_key)
            .is_some_and(Value::is_null)
        {
            attributes.remove(&self.schema.primary_key);
        }
        let buf = builder::insert(&self.schema.name, &types, &attributes);
        let rows = self.fetch_rows(&buf, RepositoryOperation::Store).await?;
        let row = rows.first().ok_or_else(|| {
            RepositoryError::database_error(RepositoryOperation::Store, "insert returned no row")
                .with_resource(&self.schema.name)
        })?;
        self.to_model(row, RepositoryOperation::Store)
    }

    async fn replace(&mut self, model: Model) -> RepositoryResult<Option<Model>> {
        let Some(key) = model.key().cloned() else {
            return Err(RepositoryError::invariant_violation(
                RepositoryOperation::Update,
                "cannot update a record without a primary key",
            )
            .with_resource(&self.schema.name));
        };
        let types = self.column_types().await?;
        let buf = builder::update(
            &self.schema.name,
            &types,
            &self.schema.primary_key,
            &key,
            model.attributes(),
        );
        let rows = self.fetch_rows(&buf, RepositoryOperation::Update).await?;
        rows.first()
            .map(|r| self.to_model(r, RepositoryOperation::Update))
            .transpose()
    }

    async fn remove(&mut self, query: &Query) -> RepositoryResult<u64> {
        let types = self.column_types().await?;
        let buf = builder::delete(&self.schema.name, &types, query);
        self.execute(&buf, RepositoryOperation::Delete).await
    }
}

#[async_trait]
impl Transactional for SqlRepository {
    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    async fn begin(&mut self) -> RepositoryResult<()> {
        if self.transaction.is_some() {
            return Err(RepositoryError::invariant_violation(
                RepositoryOperation::Transaction,
                "a transaction is already active",
            )
            .with_resource(&self.schema.name));
        }
        debug!(resource = %self.schema.name, "begin");
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.error(RepositoryOperation::Transaction, e))?;
        self.transaction = Some(tx);
        Ok(())
    }

    async fn commit(&mut self) -> RepositoryResult<()> {
        let Some(tx) = self.transaction.take() else {
            return Err(no_transaction(&self.schema));
        };
        debug!(resource = %self.schema.name, "commit");
        tx.commit()
            .await
            .map_err(|e| self.error(RepositoryOperation::Transaction, e))
    }

    async fn rollback(&mut self) -> RepositoryResult<()> {
        let Some(tx) = self.transaction.take() else {
            return Err(no_transaction(&self.schema));
        };
        debug!(resource = %self.schema.name, "rollback");
        tx.rollback()
            .await
            .map_err(|e| self.error(RepositoryOperation::Transaction, e))
    }
}

fn no_transaction(schema: &ResourceSchema) -> RepositoryError {
    RepositoryError::invariant_violation(RepositoryOperation::Transaction, "no active transaction")
        .with_resource(&schema.name)
}

/// Classify a sqlx error
pub fn map_sqlx_error(operation: RepositoryOperation, err: sqlx::Error) -> RepositoryError {
    use sqlx::Error as E;
    let (kind, message) = match err {
        E::RowNotFound => (RepositoryErrorKind::NotFound, "Row not found".to_string()),
        E::PoolTimedOut => (
            RepositoryErrorKind::Timeout,
            "Connection pool timed out".to_string(),
        ),
        E::PoolClosed => (
            RepositoryErrorKind::ConnectionFailed,
            "Connection pool is closed".to_string(),
        ),
        E::Io(e) => (RepositoryErrorKind::ConnectionFailed, e.to_string()),
        E::Tls(e) => (
            RepositoryErrorKind::ConnectionFailed,
            format!("TLS error: {}", e),
        ),
        E::WorkerCrashed => (
            RepositoryErrorKind::ConnectionFailed,
            "Database worker crashed".to_string(),
        ),
        E::ColumnDecode { index, source } => (
            RepositoryErrorKind::SerializationError,
            format!("Failed to decode column {}: {}", index, source),
        ),
        E::Decode(e) => (RepositoryErrorKind::SerializationError, e.to_string()),
        E::Database(db_err) => {
            let kind = if db_err.is_unique_violation() {
                RepositoryErrorKind::AlreadyExists
            } else if db_err.is_foreign_key_violation() || db_err.is_check_violation() {
                RepositoryErrorKind::ConstraintViolation
            } else {
                RepositoryErrorKind::DatabaseError
            };
            (kind, db_err.to_string())
        }
        other => (RepositoryErrorKind::DatabaseError, other.to_string()),
    };
    RepositoryError::new(operation, kind, message)
}

/// A row as a JSON object, column by column
///
/// A column no decoder accepts is an error rather than a null, so the record
/// is never written back with that value lost.
fn row_to_json(row: &PgRow) -> Result<Map<String, Value>, String> {
    let mut map = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = cell_to_value(row, index).ok_or_else(|| {
            format!(
                "cannot decode column {} of type {}",
                column.name(),
                column.type_info().name()
            )
        })?;
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

fn cell_to_value(row: &PgRow, index: usize) -> Option<Value> {
    if let Ok(v) = row.try_get::<Option<i16>, _>(index) {
        return Some(v.map_or(Value::Null, Value::from));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        return Some(v.map_or(Value::Null, Value::from));
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return Some(v.map_or(Value::Null, Value::from));
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(index) {
        return Some(v.map_or(Value::Null, |n| Value::from(f64::from(n))));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return Some(v.map_or(Value::Null, Value::from));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return Some(v.map_or(Value::Null, Value::Bool));
    }
    if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(index) {
        return Some(v.map_or(Value::Null, |u| Value::String(u.to_string())));
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index) {
        return Some(v.map_or(Value::Null, |t| Value::String(t.to_rfc3339())));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return Some(v.map_or(Value::Null, |t| Value::String(t.to_string())));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
        return Some(v.map_or(Value::Null, |d| Value::String(d.to_string())));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return Some(v.map_or(Value::Null, Value::String));
    }
    if let Ok(v) = row.try_get::<Option<Value>, _>(index) {
        return Some(v.unwrap_or(Value::Null));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_sqlx_error_kinds() {
        let err = map_sqlx_error(RepositoryOperation::All, sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind, RepositoryErrorKind::Timeout);
        assert!(err.is_retriable());

        let err = map_sqlx_error(RepositoryOperation::Find, sqlx::Error::RowNotFound);
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);
        assert_eq!(err.operation, RepositoryOperation::Find);

        let err = map_sqlx_error(RepositoryOperation::Store, sqlx::Error::PoolClosed);
        assert_eq!(err.kind, RepositoryErrorKind::ConnectionFailed);
    }

    #[tokio::test]
    async fn test_lazy_pool_repository_state() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/avon")
            .unwrap();
        let repo = SqlRepository::new(ResourceSchema::new("posts"), pool)
            .with_soft_deletes(SoftDeletes::default());
        assert!(!repo.in_transaction());
        assert_eq!(repo.query().wheres.len(), 1);
    }
}
