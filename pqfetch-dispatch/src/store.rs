//! Store executor seam and its PostgreSQL implementation.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::StoreError;
use crate::sql::StatementBatch;

/// Runs statements against the store.
#[async_trait]
pub trait StoreExecutor: Send + Sync + 'static {
    /// Executes every statement of the batch, in order, as one submission.
    async fn execute(&self, batch: StatementBatch) -> Result<(), StoreError>;

    /// Runs a query whose single column is a JSON document per row.
    async fn fetch_json_rows(&self, sql: &str) -> Result<Vec<Value>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StoreExecutor for PgStore {
    async fn execute(&self, batch: StatementBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let sql = batch.to_sql();
        tracing::trace!(statements = batch.len(), "executing statement batch");
        sqlx::raw_sql(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_json_rows(&self, sql: &str) -> Result<Vec<Value>, StoreError> {
        let rows = sqlx::raw_sql(sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<Value, StoreError> {
                let text: Option<String> = row.try_get(0)?;
                match text {
                    None => Ok(Value::Null),
                    Some(text) => {
                        serde_json::from_str(&text).map_err(|e| StoreError::Decode(e.to_string()))
                    }
                }
            })
            .collect()
    }
}
