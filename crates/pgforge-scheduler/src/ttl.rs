//! TTL job management (4.F): installs an idempotent PL/pgSQL delete
//! function once, then schedules per-table cleanup jobs through the
//! same [`Scheduler`] used for everything else, picking cron vs
//! in-process execution by the same rules (§4.E).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use pgforge_core::config::TtlConfig;
use pgforge_core::error::{Error, Result};
use pgforge_core::ident;
use pgforge_db::migration::{ttl_function_migration, Migrator};
use sqlx::PgPool;
use tokio::sync::Mutex as AsyncMutex;

use crate::job::{ExecutorJob, PgCronJob, ScheduleConfiguration};
use crate::scheduler::Scheduler;

/// A TTL cleanup action: names the job, supplies the positional
/// arguments passed to the installed delete function when run via
/// `pg_cron`, and can also run the delete directly when installed as
/// an in-process job instead.
#[async_trait]
pub trait TTLJobAction: Send + Sync {
    fn job_name(&self) -> &str;

    /// `[table_name, delete_predicate]` passed positionally to the
    /// installed `fn(p_table_name, p_delete_statement)` function.
    fn function_call_args(&self) -> Vec<String>;

    /// Run the delete directly against `pool`, used when this job is
    /// installed as an in-process fixed-delay job rather than as a
    /// `pg_cron` entry.
    async fn execute_directly(&self, pool: &PgPool) -> Result<()>;
}

/// The common case: delete rows from `table_name` matching
/// `where_clause`. `table_name` is validated through the identifier
/// validator (4.A) at construction time; `where_clause` is spliced
/// verbatim into the generated SQL and is the caller's responsibility
/// to keep free of untrusted input, same as the installed function's
/// own `%s` predicate splice.
pub struct DefaultTtlJobAction {
    job_name: String,
    table_name: String,
    where_clause: String,
    full_delete_sql: Option<String>,
}

impl DefaultTtlJobAction {
    pub fn new(
        job_name: impl Into<String>,
        table_name: impl Into<String>,
        where_clause: impl Into<String>,
    ) -> Result<Self> {
        let table_name = table_name.into();
        ident::check_is_valid_table_or_column_name(&table_name, Some("DefaultTtlJobAction::table_name"))?;
        Ok(Self {
            job_name: job_name.into(),
            table_name,
            where_clause: where_clause.into(),
            full_delete_sql: None,
        })
    }

    /// Override the statement run by `execute_directly` with a
    /// caller-supplied full `DELETE` statement, e.g. to delete across a
    /// join or use a CTE. Has no effect on the `pg_cron` path, which
    /// always calls through the installed function.
    pub fn with_full_delete_sql(mut self, sql: impl Into<String>) -> Self {
        self.full_delete_sql = Some(sql.into());
        self
    }
}

#[async_trait]
impl TTLJobAction for DefaultTtlJobAction {
    fn job_name(&self) -> &str {
        &self.job_name
    }

    fn function_call_args(&self) -> Vec<String> {
        vec![self.table_name.clone(), self.where_clause.clone()]
    }

    async fn execute_directly(&self, pool: &PgPool) -> Result<()> {
        let sql = self.full_delete_sql.clone().unwrap_or_else(|| {
            format!("DELETE FROM {} WHERE {}", self.table_name, self.where_clause)
        });

        sqlx::query(&sql)
            .execute(pool)
            .await
            .map_err(|e| Error::database_with_source("ttl delete failed", e))?;

        Ok(())
    }
}

/// A TTL job registration queued before [`TtlManager::start`] has run.
struct QueuedTtlJob {
    action: Arc<dyn TTLJobAction>,
    configuration: ScheduleConfiguration,
}

/// Installs the TTL delete function on first use and schedules TTL
/// cleanup jobs through a [`Scheduler`].
///
/// Itself a small `Lifecycle` object per §4.F: `scheduleTTLJob` de-dups
/// against the registered list and, until `start` has run, only queues
/// the definition rather than installing it through the scheduler.
pub struct TtlManager {
    pool: PgPool,
    scheduler: Arc<Scheduler>,
    function_name: String,
    installed: AtomicBool,
    install_lock: AsyncMutex<()>,
    started: AtomicBool,
    registered_names: RwLock<HashSet<String>>,
    pending: RwLock<Vec<QueuedTtlJob>>,
}

impl TtlManager {
    pub fn new(pool: PgPool, scheduler: Arc<Scheduler>, config: &TtlConfig) -> Result<Self> {
        if !ident::is_valid_function_name(&config.ttl_function_name) {
            return Err(Error::invalid_identifier_in(
                &config.ttl_function_name,
                "TtlConfig::ttl_function_name",
            ));
        }
        Ok(Self {
            pool,
            scheduler,
            function_name: config.ttl_function_name.clone(),
            installed: AtomicBool::new(false),
            install_lock: AsyncMutex::new(()),
            started: AtomicBool::new(false),
            registered_names: RwLock::new(HashSet::new()),
            pending: RwLock::new(Vec::new()),
        })
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Start the TTL manager: every definition queued by a prior
    /// `schedule_ttl_job` call is now installed through the scheduler.
    /// Idempotent.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let queued: Vec<QueuedTtlJob> = self.pending.write().drain(..).collect();
        for job in queued {
            self.install(job.action, job.configuration).await;
        }

        Ok(())
    }

    /// De-duplicated, idempotent install of the delete function. Safe
    /// to call repeatedly and from concurrent callers; only the first
    /// caller after a cold start pays for the round trip.
    async fn ensure_function_installed(&self) -> Result<()> {
        if self.installed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.install_lock.lock().await;
        if self.installed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let version = migration_version_for(&self.function_name);
        let migration = ttl_function_migration(version, &self.function_name);
        Migrator::new().with_migrations(vec![migration]).run(&self.pool).await?;

        self.installed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Register a TTL cleanup action under `configuration`. De-duped
    /// against the registered list by `action.job_name()`: a second
    /// call with an already-registered name is a no-op. If this
    /// manager has not yet `start`ed, the definition is queued rather
    /// than installed; `start` later drains the queue. If already
    /// started, it is installed through the scheduler immediately,
    /// which itself chooses `pg_cron` or an in-process timer per §4.E.
    pub async fn schedule_ttl_job(
        &self,
        action: Arc<dyn TTLJobAction>,
        configuration: ScheduleConfiguration,
    ) -> Result<()> {
        let name = action.job_name().to_string();
        if !self.registered_names.write().insert(name.clone()) {
            tracing::debug!(job = %name, "TTL job already registered, skipping");
            return Ok(());
        }

        self.ensure_function_installed().await?;

        if !self.is_started() {
            self.pending.write().push(QueuedTtlJob { action, configuration });
            return Ok(());
        }

        self.install(action, configuration).await;
        Ok(())
    }

    async fn install(&self, action: Arc<dyn TTLJobAction>, configuration: ScheduleConfiguration) {
        let cron_expression = match &configuration {
            ScheduleConfiguration::Cron { expression, .. } => expression.clone(),
            ScheduleConfiguration::FixedDelay(_) => String::new(),
        };
        let function_name = self.function_name.clone();
        let pool = self.pool.clone();
        let name = action.job_name().to_string();

        let cron_action = action.clone();
        let make_cron_job = move |resolved_name: &str| PgCronJob {
            name: resolved_name.to_string(),
            function_name: function_name.clone(),
            args: Some(cron_action.function_call_args()),
            cron_expression: cron_expression.clone(),
        };

        let exec_action = action.clone();
        let make_executor_job = move |resolved_name: &str, fixed_delay| {
            let exec_action = exec_action.clone();
            let pool = pool.clone();
            ExecutorJob::new(resolved_name, fixed_delay, move || {
                let exec_action = exec_action.clone();
                let pool = pool.clone();
                async move { exec_action.execute_directly(&pool).await }
            })
        };

        self.scheduler
            .schedule(name, configuration, make_cron_job, make_executor_job)
            .await;
    }
}

/// Derives a migration ledger version from the function name, kept
/// well above [`pgforge_db::migration::control_plane_migrations`]'s
/// version numbers so distinct TTL function names don't collide with
/// each other or with the control-plane migrations in the shared
/// `pgforge_migrations` ledger table.
fn migration_version_for(function_name: &str) -> i64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in function_name.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    3_000_000 + (hash % 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_version_is_deterministic_and_namespaced() {
        let a = migration_version_for("pgforge_ttl_delete");
        let b = migration_version_for("pgforge_ttl_delete");
        assert_eq!(a, b);
        assert!(a >= 3_000_000);
    }

    #[test]
    fn distinct_function_names_usually_get_distinct_versions() {
        let a = migration_version_for("pgforge_ttl_delete");
        let b = migration_version_for("other_ttl_delete");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn rejects_invalid_table_name() {
        let err = DefaultTtlJobAction::new("job", "select", "true").unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier { .. }));
    }
}
