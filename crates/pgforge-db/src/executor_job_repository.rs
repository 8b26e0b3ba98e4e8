//! CRUD over the `executor_scheduled_job` observability table (4.D).

use chrono::{DateTime, Utc};
use pgforge_core::error::{Error, Result};
use sqlx::PgPool;

use crate::models::ExecutorJobEntryRow;

/// A new row to insert when an in-process job is scheduled.
#[derive(Debug, Clone)]
pub struct NewExecutorJobEntry {
    pub name: String,
    pub host: String,
    pub next_fire_at: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait ExecutorJobRepository: Send + Sync {
    async fn insert(&self, job: &NewExecutorJobEntry) -> Result<()>;
    async fn exists_by_name(&self, name: &str) -> Result<bool>;
    async fn delete_by_name(&self, name: &str) -> Result<()>;
    async fn delete_by_name_ending_with_instance_id(&self, instance_id: &str) -> Result<u64>;
    async fn delete_all(&self) -> Result<u64>;
    async fn fetch_executor_job_entries(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ExecutorJobEntryRow>>;
    async fn get_total_executor_job_entries(&self) -> Result<i64>;
}

pub struct PostgresExecutorJobRepository {
    pool: PgPool,
}

impl PostgresExecutorJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn classify(&self, message: &str, err: sqlx::Error) -> Error {
        let is_io = matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut);
        Error::database_classified(message, is_io, err)
    }
}

#[async_trait::async_trait]
impl ExecutorJobRepository for PostgresExecutorJobRepository {
    async fn insert(&self, job: &NewExecutorJobEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO executor_scheduled_job (name, host, next_fire_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET host = EXCLUDED.host, next_fire_at = EXCLUDED.next_fire_at
            "#,
        )
        .bind(&job.name)
        .bind(&job.host)
        .bind(job.next_fire_at)
        .execute(&self.pool)
        .await
        .map_err(|e| self.classify("failed to insert executor job audit row", e))?;

        Ok(())
    }

    async fn exists_by_name(&self, name: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM executor_scheduled_job WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| self.classify("failed to check executor job existence", e))?;

        Ok(row.is_some())
    }

    async fn delete_by_name(&self, name: &str) -> Result<()> {
        if let Err(e) = sqlx::query("DELETE FROM executor_scheduled_job WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
        {
            let classified = self.classify("failed to delete executor job audit row", e);
            if classified.is_io() {
                tracing::debug!(name, error = %classified, "transient error deleting executor job row");
            } else {
                tracing::warn!(name, error = %classified, "failed to delete executor job row");
            }
        }
        Ok(())
    }

    async fn delete_by_name_ending_with_instance_id(&self, instance_id: &str) -> Result<u64> {
        let pattern = format!("%{instance_id}");
        match sqlx::query("DELETE FROM executor_scheduled_job WHERE name LIKE $1")
            .bind(&pattern)
            .execute(&self.pool)
            .await
        {
            Ok(result) => Ok(result.rows_affected()),
            Err(e) => {
                let classified = self.classify("failed to purge executor job residue", e);
                if classified.is_io() {
                    tracing::debug!(instance_id, error = %classified, "transient error purging executor residue");
                } else {
                    tracing::warn!(instance_id, error = %classified, "failed to purge executor residue");
                }
                Ok(0)
            }
        }
    }

    async fn delete_all(&self) -> Result<u64> {
        match sqlx::query("DELETE FROM executor_scheduled_job")
            .execute(&self.pool)
            .await
        {
            Ok(result) => Ok(result.rows_affected()),
            Err(e) => {
                let classified = self.classify("failed to clear executor job audit table", e);
                if classified.is_io() {
                    tracing::debug!(error = %classified, "transient error clearing executor audit table");
                } else {
                    tracing::warn!(error = %classified, "failed to clear executor audit table");
                }
                Ok(0)
            }
        }
    }

    async fn fetch_executor_job_entries(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ExecutorJobEntryRow>> {
        sqlx::query_as::<_, ExecutorJobEntryRow>(
            r#"
            SELECT name, host, last_started_at, next_fire_at, created_at
            FROM executor_scheduled_job
            ORDER BY name
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.classify("failed to fetch executor job entries", e))
    }

    async fn get_total_executor_job_entries(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM executor_scheduled_job")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.classify("failed to count executor job entries", e))?;

        Ok(row.0)
    }
}
