//! Data access over the `cron` extension schema (4.C).

use pgforge_core::error::{Error, Result};
use pgforge_core::ident;
use sqlx::{PgPool, Row};

use crate::models::{CronJobRow, CronJobRunDetailRow};

/// The message substring `pg_cron` emits when the extension is
/// installed but not present in `shared_preload_libraries`.
const NOT_LOADED_SUBSTRING: &str = r#"must be loaded via "shared_preload_libraries""#;

/// A job to install into `cron.job` via `cron.schedule`.
#[derive(Debug, Clone)]
pub struct PgCronJob {
    pub name: String,
    pub function_name: String,
    pub args: Option<Vec<String>>,
    pub cron_expression: String,
}

impl PgCronJob {
    /// Build the `SELECT fn(args)` call body, after validating
    /// `function_name` through the identifier validator (4.A). Args
    /// are spliced as single-quoted SQL string literals since
    /// `cron.schedule` takes the whole call as one text argument and
    /// offers no parameter binding of its own.
    fn sql_call(&self) -> Result<String> {
        if !ident::is_valid_function_name(&self.function_name) {
            return Err(Error::invalid_identifier_in(
                &self.function_name,
                "PgCronJob::function_name",
            ));
        }
        let args = match &self.args {
            Some(args) => args
                .iter()
                .map(|a| format!("'{}'", a.replace('\'', "''")))
                .collect::<Vec<_>>()
                .join(", "),
            None => String::new(),
        };
        Ok(format!("SELECT {}({})", self.function_name, args))
    }
}

#[async_trait::async_trait]
pub trait PgCronRepository: Send + Sync {
    async fn schedule(&self, job: &PgCronJob) -> Result<Option<i64>>;
    async fn unschedule(&self, job_id: i64) -> Result<()>;
    async fn does_job_exist(&self, name: &str) -> Result<Option<i64>>;
    async fn delete_job_by_name_ending_with_instance_id(&self, instance_id: &str) -> Result<u64>;
    async fn list_jobs(&self, offset: i64, limit: i64) -> Result<Vec<CronJobRow>>;
    async fn list_job_run_details(
        &self,
        job_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<CronJobRunDetailRow>>;

    /// Probe whether `pg_cron` is usable: the extension must exist and
    /// a throwaway schedule+unschedule round-trip must succeed without
    /// an [`Error::ExtensionNotLoaded`] classification.
    async fn probe_available(&self) -> bool;
}

/// Whether a database error returned while talking to `cron.schedule`
/// indicates the extension is installed but not preloaded (§4.C, §7).
pub fn is_extension_not_loaded_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().contains(NOT_LOADED_SUBSTRING),
        _ => false,
    }
}

pub struct PostgresPgCronRepository {
    pool: PgPool,
}

impl PostgresPgCronRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn classify(&self, message: &str, err: sqlx::Error) -> Error {
        if is_extension_not_loaded_error(&err) {
            return Error::ExtensionNotLoaded;
        }
        let is_io = matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut);
        Error::database_classified(message, is_io, err)
    }
}

#[async_trait::async_trait]
impl PgCronRepository for PostgresPgCronRepository {
    async fn schedule(&self, job: &PgCronJob) -> Result<Option<i64>> {
        let sql_call = job.sql_call()?;

        let row = sqlx::query("SELECT cron.schedule($1, $2, $3) AS jobid")
            .bind(&job.name)
            .bind(&job.cron_expression)
            .bind(&sql_call)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.classify("cron.schedule failed", e))?;

        let job_id: Option<i64> = row.try_get("jobid").ok();
        Ok(job_id)
    }

    async fn unschedule(&self, job_id: i64) -> Result<()> {
        if let Err(e) = sqlx::query("SELECT cron.unschedule($1)")
            .bind(job_id)
            .execute(&self.pool)
            .await
        {
            let classified = self.classify("cron.unschedule failed", e);
            if classified.is_io() {
                tracing::debug!(job_id, error = %classified, "transient error unscheduling cron job");
            } else {
                tracing::warn!(job_id, error = %classified, "failed to unschedule cron job");
            }
        }
        Ok(())
    }

    async fn does_job_exist(&self, name: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT jobid FROM cron.job WHERE jobname = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.classify("failed to check cron.job existence", e))?;

        Ok(row.and_then(|r| r.try_get::<i64, _>("jobid").ok()))
    }

    async fn delete_job_by_name_ending_with_instance_id(&self, instance_id: &str) -> Result<u64> {
        let pattern = format!("%{instance_id}");
        match sqlx::query("DELETE FROM cron.job WHERE jobname LIKE $1")
            .bind(&pattern)
            .execute(&self.pool)
            .await
        {
            Ok(result) => Ok(result.rows_affected()),
            Err(e) => {
                let classified = self.classify("failed to purge residual cron jobs", e);
                if classified.is_io() {
                    tracing::debug!(instance_id, error = %classified, "transient error purging cron residue");
                } else {
                    tracing::warn!(instance_id, error = %classified, "failed to purge cron residue");
                }
                Ok(0)
            }
        }
    }

    async fn list_jobs(&self, offset: i64, limit: i64) -> Result<Vec<CronJobRow>> {
        sqlx::query_as::<_, CronJobRow>(
            "SELECT jobid, jobname, schedule, command, active FROM cron.job ORDER BY jobid OFFSET $1 LIMIT $2",
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.classify("failed to list cron.job", e))
    }

    async fn list_job_run_details(
        &self,
        job_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<CronJobRunDetailRow>> {
        sqlx::query_as::<_, CronJobRunDetailRow>(
            r#"
            SELECT runid, jobid, status, return_message, start_time, end_time
            FROM cron.job_run_details
            WHERE jobid = $1
            ORDER BY runid DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(job_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.classify("failed to list cron.job_run_details", e))
    }

    async fn probe_available(&self) -> bool {
        let probe_name = format!("pgforge-probe-{}", uuid_like_suffix());
        let probe = PgCronJob {
            name: probe_name.clone(),
            function_name: "now".to_string(),
            args: None,
            cron_expression: "0 0 1 1 *".to_string(),
        };

        match self.schedule(&probe).await {
            Ok(Some(job_id)) => {
                let _ = self.unschedule(job_id).await;
                true
            }
            Ok(None) => false,
            Err(Error::ExtensionNotLoaded) => false,
            Err(_) => false,
        }
    }
}

/// Cheap unique-enough suffix for probe job names; avoids pulling in
/// `uuid` just for this one throwaway identifier.
fn uuid_like_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}")
}
