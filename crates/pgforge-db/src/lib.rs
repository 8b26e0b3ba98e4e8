//! # pgforge-db
//!
//! sqlx-backed repositories over `cron.job`, the
//! `executor_scheduled_job` audit table, and the
//! `durable_subscription_resume_points` table, plus the migrations
//! that create pgforge's own control-plane schema.

pub mod executor_job_repository;
pub mod migration;
pub mod models;
pub mod pg_cron_repository;
pub mod resume_point_repository;

pub use executor_job_repository::{
    ExecutorJobRepository, NewExecutorJobEntry, PostgresExecutorJobRepository,
};
pub use migration::{control_plane_migrations, ttl_function_migration, Migration, Migrator};
pub use pg_cron_repository::{is_extension_not_loaded_error, PgCronJob, PgCronRepository, PostgresPgCronRepository};
pub use resume_point_repository::{DurableSubscriptionRepository, PostgresDurableSubscriptionRepository};
