//! The cluster-coordinated scheduler core (4.E).
//!
//! States: `Stopped -> Starting -> Follower -> Leader -> Follower ->
//! ... -> Stopping -> Stopped`. Only the current leader installs and
//! runs jobs; on failover the new leader re-installs everything from
//! its own registration list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use pgforge_core::error::Result;
use pgforge_core::instance;
use pgforge_core::lock::{FencedLockManager, LockCallbacks};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use pgforge_db::executor_job_repository::{ExecutorJobRepository, NewExecutorJobEntry};
use pgforge_db::pg_cron_repository::PgCronRepository;

use crate::job::{ExecutorJob, FixedDelay, PgCronJob, ScheduleConfiguration};

type CronJobFactory = Arc<dyn Fn(&str) -> PgCronJob + Send + Sync>;
type ExecutorJobFactory = Arc<dyn Fn(&str, FixedDelay) -> ExecutorJob + Send + Sync>;

/// One entry in the scheduler's registration list. `Adaptive` defers
/// the cron-vs-in-process decision to install time, per §4.E
/// "Selecting a scheduling mode".
#[derive(Clone)]
enum Registration {
    PgCron(PgCronJob),
    Executor(ExecutorJob),
    Adaptive {
        name: String,
        configuration: ScheduleConfiguration,
        make_cron_job: CronJobFactory,
        make_executor_job: ExecutorJobFactory,
    },
}

enum LockEvent {
    Acquired,
    Released,
}

/// Configuration knobs the scheduler needs beyond what lives in
/// `pgforge_core::config::SchedulerConfig` (kept here rather than
/// growing that struct, since these are wiring concerns not operator
/// tunables).
pub struct SchedulerDeps {
    pub cron_repo: Arc<dyn PgCronRepository>,
    pub executor_repo: Arc<dyn ExecutorJobRepository>,
    pub lock_manager: Arc<dyn FencedLockManager>,
}

/// The scheduler core. A `Lifecycle` object: `start`/`stop`,
/// `is_started`. Jobs may be registered before `start` (queued) or
/// after (scheduled immediately if this node is leader).
pub struct Scheduler {
    cron_repo: Arc<dyn PgCronRepository>,
    executor_repo: Arc<dyn ExecutorJobRepository>,
    lock_manager: Arc<dyn FencedLockManager>,
    lock_name: String,
    host: String,
    instance_id: String,

    registrations: Arc<RwLock<Vec<Registration>>>,
    pg_cron_job_ids: Arc<DashMap<String, i64>>,
    executor_job_handles: Arc<DashMap<String, JoinHandle<()>>>,
    tick_semaphore: Arc<Semaphore>,

    pg_cron_available: Arc<AtomicBool>,
    lock_acquired: Arc<AtomicBool>,
    started: Arc<AtomicBool>,

    event_tx: RwLock<Option<mpsc::UnboundedSender<LockEvent>>>,
    sweep_task: RwLock<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(deps: SchedulerDeps, config: &pgforge_core::config::SchedulerConfig) -> Self {
        let host = instance::local_host_name();
        let instance_id = instance::instance_id();
        Self {
            cron_repo: deps.cron_repo,
            executor_repo: deps.executor_repo,
            lock_manager: deps.lock_manager,
            lock_name: config.lock_name.clone(),
            host,
            instance_id,
            registrations: Arc::new(RwLock::new(Vec::new())),
            pg_cron_job_ids: Arc::new(DashMap::new()),
            executor_job_handles: Arc::new(DashMap::new()),
            tick_semaphore: Arc::new(Semaphore::new(config.max_concurrent_ticks.max(1))),
            pg_cron_available: Arc::new(AtomicBool::new(false)),
            lock_acquired: Arc::new(AtomicBool::new(false)),
            started: Arc::new(AtomicBool::new(false)),
            event_tx: RwLock::new(None),
            sweep_task: RwLock::new(None),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_leader(&self) -> bool {
        self.lock_acquired.load(Ordering::SeqCst)
    }

    pub fn pg_cron_available(&self) -> bool {
        self.pg_cron_available.load(Ordering::SeqCst)
    }

    /// Register a job that is always installed as a `cron.job` row.
    /// If this node is currently leader, installs it immediately;
    /// otherwise it is picked up on the next `onLockAcquired` sweep.
    pub async fn schedule_pg_cron_job(&self, job: PgCronJob) {
        self.registrations
            .write()
            .push(Registration::PgCron(job.clone()));
        if self.lock_acquired.load(Ordering::SeqCst) && self.pg_cron_available() {
            self.install_pg_cron_job(&job).await;
        }
    }

    /// Register a job that is always run via the in-process timer
    /// pool, regardless of `pg_cron` availability.
    pub async fn schedule_executor_job(&self, job: ExecutorJob) {
        self.registrations
            .write()
            .push(Registration::Executor(job.clone()));
        if self.lock_acquired.load(Ordering::SeqCst) {
            self.install_executor_job(&job).await;
        }
    }

    /// Register a job whose scheduling mode (cron vs in-process) is
    /// selected at install time per §4.E's rules, given `configuration`.
    pub async fn schedule(
        &self,
        name: impl Into<String>,
        configuration: ScheduleConfiguration,
        make_cron_job: impl Fn(&str) -> PgCronJob + Send + Sync + 'static,
        make_executor_job: impl Fn(&str, FixedDelay) -> ExecutorJob + Send + Sync + 'static,
    ) {
        let name = name.into();
        let registration = Registration::Adaptive {
            name: name.clone(),
            configuration,
            make_cron_job: Arc::new(make_cron_job),
            make_executor_job: Arc::new(make_executor_job),
        };
        let snapshot = registration.clone();
        self.registrations.write().push(registration);

        if self.lock_acquired.load(Ordering::SeqCst) {
            self.install_registration(&snapshot).await;
        }
    }

    /// Start the scheduler: probe `pg_cron`, purge this node's prior
    /// residue, then hand leadership contention to the fenced lock.
    /// Idempotent.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.pg_cron_available
            .store(self.cron_repo.probe_available().await, Ordering::SeqCst);
        tracing::info!(available = self.pg_cron_available(), "pg_cron availability probed");

        self.purge_own_residue().await;

        let (tx, mut rx) = mpsc::unbounded_channel::<LockEvent>();
        *self.event_tx.write() = Some(tx.clone());

        let acquired_tx = tx.clone();
        let released_tx = tx;
        let callbacks = LockCallbacks::new(
            move || {
                let _ = acquired_tx.send(LockEvent::Acquired);
            },
            move || {
                let _ = released_tx.send(LockEvent::Released);
            },
        );

        let registrations = self.registrations.clone();
        let pg_cron_job_ids = self.pg_cron_job_ids.clone();
        let executor_job_handles = self.executor_job_handles.clone();
        let cron_repo = self.cron_repo.clone();
        let executor_repo = self.executor_repo.clone();
        let pg_cron_available = self.pg_cron_available.clone();
        let lock_acquired = self.lock_acquired.clone();
        let instance_id = self.instance_id.clone();
        let host = self.host.clone();
        let tick_semaphore = self.tick_semaphore.clone();

        let sweep_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    LockEvent::Acquired => {
                        tracing::info!("lock acquired, becoming leader");
                        purge_residue(&cron_repo, &executor_repo, &instance_id).await;

                        let snapshot: Vec<Registration> = registrations.read().clone();
                        for registration in &snapshot {
                            install(
                                registration,
                                &cron_repo,
                                &executor_repo,
                                &pg_cron_job_ids,
                                &executor_job_handles,
                                pg_cron_available.load(Ordering::SeqCst),
                                &instance_id,
                                &host,
                                &tick_semaphore,
                            )
                            .await;
                        }

                        lock_acquired.store(true, Ordering::SeqCst);
                    }
                    LockEvent::Released => {
                        tracing::info!("lock released, stepping down to follower");
                        release_leadership(
                            &cron_repo,
                            &executor_repo,
                            &pg_cron_job_ids,
                            &executor_job_handles,
                            &instance_id,
                        )
                        .await;
                        lock_acquired.store(false, Ordering::SeqCst);
                    }
                }
            }
        });
        *self.sweep_task.write() = Some(sweep_task);

        self.lock_manager
            .acquire_lock_async(&self.lock_name, callbacks)
            .await;

        Ok(())
    }

    /// Stop the scheduler: if leader, clear the audit table; cancel
    /// leader election; repeat unschedule/purge; shut down the timer
    /// pool.
    pub async fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if self.lock_acquired.load(Ordering::SeqCst) {
            let _ = self.executor_repo.delete_all().await;
        }

        self.lock_manager
            .cancel_async_lock_acquiring(&self.lock_name)
            .await;

        release_leadership(
            &self.cron_repo,
            &self.executor_repo,
            &self.pg_cron_job_ids,
            &self.executor_job_handles,
            &self.instance_id,
        )
        .await;
        self.lock_acquired.store(false, Ordering::SeqCst);

        *self.event_tx.write() = None;
        if let Some(task) = self.sweep_task.write().take() {
            task.abort();
        }

        Ok(())
    }

    async fn purge_own_residue(&self) {
        purge_residue(&self.cron_repo, &self.executor_repo, &self.instance_id).await;
    }

    async fn install_registration(&self, registration: &Registration) {
        install(
            registration,
            &self.cron_repo,
            &self.executor_repo,
            &self.pg_cron_job_ids,
            &self.executor_job_handles,
            self.pg_cron_available(),
            &self.instance_id,
            &self.host,
            &self.tick_semaphore,
        )
        .await;
    }

    async fn install_pg_cron_job(&self, job: &PgCronJob) {
        install_pg_cron(job, &self.cron_repo, &self.pg_cron_job_ids, &self.instance_id).await;
    }

    async fn install_executor_job(&self, job: &ExecutorJob) {
        install_executor(
            job,
            &self.executor_repo,
            &self.executor_job_handles,
            &self.instance_id,
            &self.host,
            &self.tick_semaphore,
        )
        .await;
    }
}

async fn purge_residue(
    cron_repo: &Arc<dyn PgCronRepository>,
    executor_repo: &Arc<dyn ExecutorJobRepository>,
    instance_id: &str,
) {
    let _ = cron_repo
        .delete_job_by_name_ending_with_instance_id(instance_id)
        .await;
    let _ = executor_repo
        .delete_by_name_ending_with_instance_id(instance_id)
        .await;
}

#[allow(clippy::too_many_arguments)]
async fn install(
    registration: &Registration,
    cron_repo: &Arc<dyn PgCronRepository>,
    executor_repo: &Arc<dyn ExecutorJobRepository>,
    pg_cron_job_ids: &Arc<DashMap<String, i64>>,
    executor_job_handles: &Arc<DashMap<String, JoinHandle<()>>>,
    pg_cron_available: bool,
    instance_id: &str,
    host: &str,
    tick_semaphore: &Arc<Semaphore>,
) {
    match registration {
        Registration::PgCron(job) => {
            if pg_cron_available {
                install_pg_cron(job, cron_repo, pg_cron_job_ids, instance_id).await;
            } else {
                tracing::warn!(job = %job.name, "pg_cron unavailable, skipping cron-only job registration");
            }
        }
        Registration::Executor(job) => {
            install_executor(job, executor_repo, executor_job_handles, instance_id, host, tick_semaphore)
                .await;
        }
        Registration::Adaptive {
            name,
            configuration,
            make_cron_job,
            make_executor_job,
        } => match configuration {
            ScheduleConfiguration::Cron { .. } if pg_cron_available => {
                let job = make_cron_job(name);
                install_pg_cron(&job, cron_repo, pg_cron_job_ids, instance_id).await;
            }
            ScheduleConfiguration::Cron { .. } => {
                let fixed_delay = configuration.to_fixed_delay_configuration();
                tracing::warn!(job = %name, "pg_cron unavailable, falling back to in-process fixed-delay scheduling");
                let job = make_executor_job(name, fixed_delay);
                install_executor(&job, executor_repo, executor_job_handles, instance_id, host, tick_semaphore)
                    .await;
            }
            ScheduleConfiguration::FixedDelay(fixed_delay) => {
                let job = make_executor_job(name, *fixed_delay);
                install_executor(&job, executor_repo, executor_job_handles, instance_id, host, tick_semaphore)
                    .await;
            }
        },
    }
}

async fn install_pg_cron(
    job: &PgCronJob,
    cron_repo: &Arc<dyn PgCronRepository>,
    pg_cron_job_ids: &Arc<DashMap<String, i64>>,
    instance_id: &str,
) {
    let suffixed_name = instance::suffixed_job_name(&job.name, instance_id);

    match cron_repo.does_job_exist(&suffixed_name).await {
        Ok(Some(_)) => {
            tracing::debug!(job = %suffixed_name, "cron job already present, skipping install");
            return;
        }
        Ok(None) => {}
        Err(e) => {
            log_absorbed(&e, "failed to check cron.job existence");
            return;
        }
    }

    let db_job = pgforge_db::pg_cron_repository::PgCronJob {
        name: suffixed_name.clone(),
        function_name: job.function_name.clone(),
        args: job.args.clone(),
        cron_expression: job.cron_expression.clone(),
    };

    match cron_repo.schedule(&db_job).await {
        Ok(Some(job_id)) => {
            pg_cron_job_ids.insert(job.name.clone(), job_id);
            tracing::info!(job = %suffixed_name, job_id, "installed pg_cron job");
        }
        Ok(None) => {
            tracing::warn!(job = %suffixed_name, "cron.schedule returned no job id");
        }
        Err(e) => log_absorbed(&e, "failed to install pg_cron job"),
    }
}

async fn install_executor(
    job: &ExecutorJob,
    executor_repo: &Arc<dyn ExecutorJobRepository>,
    executor_job_handles: &Arc<DashMap<String, JoinHandle<()>>>,
    instance_id: &str,
    host: &str,
    tick_semaphore: &Arc<Semaphore>,
) {
    // The in-memory handle map is keyed the same way as the repository
    // guard below (by logical job name); checking it first catches a
    // duplicate install before spawning a second ticking task, rather
    // than silently overwriting (and leaking) an already-running one.
    if executor_job_handles.contains_key(&job.name) {
        tracing::debug!(job = %job.name, "executor job already running on this node, skipping");
        return;
    }

    let suffixed_name = instance::suffixed_job_name(&job.name, instance_id);

    match executor_repo.exists_by_name(&suffixed_name).await {
        Ok(true) => {
            tracing::debug!(job = %suffixed_name, "executor job already registered, skipping");
            return;
        }
        Ok(false) => {}
        Err(e) => {
            log_absorbed(&e, "failed to check executor job existence");
            return;
        }
    }

    let task = job.task.clone();
    let fixed_delay = job.fixed_delay;
    let semaphore = tick_semaphore.clone();
    let job_name_for_log = suffixed_name.clone();

    let handle = tokio::spawn(async move {
        tokio::time::sleep(fixed_delay.initial_delay).await;
        let mut interval = tokio::time::interval(fixed_delay.period);
        loop {
            interval.tick().await;
            let Ok(_permit) = semaphore.acquire().await else {
                break;
            };
            if let Err(e) = task().await {
                tracing::warn!(job = %job_name_for_log, error = %e, "job task failed, will retry next tick");
            }
        }
    });

    executor_job_handles.insert(job.name.clone(), handle);

    if let Err(e) = executor_repo
        .insert(&NewExecutorJobEntry {
            name: suffixed_name.clone(),
            host: host.to_string(),
            next_fire_at: None,
        })
        .await
    {
        log_absorbed(&e, "failed to insert executor job audit row");
    }

    tracing::info!(job = %suffixed_name, "installed in-process fixed-delay job");
}

async fn release_leadership(
    cron_repo: &Arc<dyn PgCronRepository>,
    executor_repo: &Arc<dyn ExecutorJobRepository>,
    pg_cron_job_ids: &Arc<DashMap<String, i64>>,
    executor_job_handles: &Arc<DashMap<String, JoinHandle<()>>>,
    instance_id: &str,
) {
    for entry in executor_job_handles.iter() {
        entry.value().abort();
    }
    executor_job_handles.clear();

    let _ = executor_repo
        .delete_by_name_ending_with_instance_id(instance_id)
        .await;

    for entry in pg_cron_job_ids.iter() {
        let _ = cron_repo.unschedule(*entry.value()).await;
    }
    pg_cron_job_ids.clear();
    let _ = cron_repo
        .delete_job_by_name_ending_with_instance_id(instance_id)
        .await;

    // Belt-and-braces per §9: also clear the whole audit table. This
    // can race a newly-elected leader on another node observing an
    // empty table; audit rows are advisory, not authoritative.
    let _ = executor_repo.delete_all().await;
}

fn log_absorbed(err: &pgforge_core::error::Error, context: &str) {
    if err.is_io() {
        tracing::debug!(error = %err, "{}", context);
    } else {
        tracing::warn!(error = %err, "{}", context);
    }
}
