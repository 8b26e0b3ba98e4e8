//! Row types persisted and read by the pgforge repositories (§3, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row in `cron.job`, as created by the `pg_cron` extension.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct CronJobRow {
    pub jobid: i64,
    pub jobname: Option<String>,
    pub schedule: String,
    pub command: String,
    pub active: bool,
}

/// A row in `cron.job_run_details`, used for observability only.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct CronJobRunDetailRow {
    pub runid: i64,
    pub jobid: i64,
    pub status: Option<String>,
    pub return_message: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// A row in `executor_scheduled_job`, the cross-node observability
/// table for in-process fixed-delay jobs (§3 `ExecutorJobEntry`, §6).
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ExecutorJobEntryRow {
    pub name: String,
    pub host: String,
    pub last_started_at: Option<DateTime<Utc>>,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A row in `durable_subscription_resume_points`, keyed on
/// `(subscriber_id, aggregate_type)` (§3, §6).
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct SubscriptionResumePointRow {
    pub subscriber_id: String,
    pub aggregate_type: String,
    pub resume_from_and_including_global_order: i64,
    pub updated_at: DateTime<Utc>,
}
