//! Scheduling configuration and job types (§3).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use pgforge_core::error::Result;

/// `(initialDelay, period, unit)` for an in-process fixed-rate job.
/// `unit` is folded into `initial_delay`/`period` as a plain
/// `Duration` rather than carried separately, since Rust has no
/// ambiguity around "unit" the way the distilled spec's host language
/// does.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    pub initial_delay: Duration,
    pub period: Duration,
}

impl FixedDelay {
    pub fn new(initial_delay: Duration, period: Duration) -> Self {
        Self {
            initial_delay,
            period,
        }
    }
}

/// Either an externally-persisted cron schedule or an in-process
/// fixed-delay schedule (§3 `ScheduleConfiguration`).
#[derive(Debug, Clone)]
pub enum ScheduleConfiguration {
    Cron {
        expression: String,
        /// Fallback used when `pg_cron` is unavailable at the time
        /// this configuration is installed.
        fixed_delay: Option<FixedDelay>,
    },
    FixedDelay(FixedDelay),
}

impl ScheduleConfiguration {
    pub fn cron(expression: impl Into<String>) -> Self {
        ScheduleConfiguration::Cron {
            expression: expression.into(),
            fixed_delay: None,
        }
    }

    pub fn cron_with_fallback(expression: impl Into<String>, fallback: FixedDelay) -> Self {
        ScheduleConfiguration::Cron {
            expression: expression.into(),
            fixed_delay: Some(fallback),
        }
    }

    pub fn fixed_delay(initial_delay: Duration, period: Duration) -> Self {
        ScheduleConfiguration::FixedDelay(FixedDelay::new(initial_delay, period))
    }

    /// Derive the fixed-delay schedule to fall back to when `pg_cron`
    /// is unavailable: the carried fallback if present, otherwise a
    /// conservative default (§3 Supplemental detail — no attempt is
    /// made to infer an interval from the cron expression itself).
    pub fn to_fixed_delay_configuration(&self) -> FixedDelay {
        match self {
            ScheduleConfiguration::Cron { fixed_delay, .. } => fixed_delay.unwrap_or(FixedDelay {
                initial_delay: Duration::from_secs(5),
                period: Duration::from_secs(60),
            }),
            ScheduleConfiguration::FixedDelay(fd) => *fd,
        }
    }
}

/// A cron job to install as a row in `cron.job` (§3 `PgCronJob`).
/// `name` is the logical name; the scheduler appends the instance-id
/// suffix before handing it to the repository.
#[derive(Debug, Clone)]
pub struct PgCronJob {
    pub name: String,
    pub function_name: String,
    pub args: Option<Vec<String>>,
    pub cron_expression: String,
}

/// An opaque effectful operation executed on the timer pool. Errors
/// are caught by the scheduler's task wrapper and logged; they never
/// stop the job from ticking again (§4.E).
pub type Task = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// An in-process fixed-delay job (§3 `ExecutorJob`).
#[derive(Clone)]
pub struct ExecutorJob {
    pub name: String,
    pub fixed_delay: FixedDelay,
    pub task: Task,
}

impl ExecutorJob {
    pub fn new<F, Fut>(name: impl Into<String>, fixed_delay: FixedDelay, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            fixed_delay,
            task: Arc::new(move || Box::pin(task())),
        }
    }
}

impl std::fmt::Debug for ExecutorJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorJob")
            .field("name", &self.name)
            .field("fixed_delay", &self.fixed_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_without_fallback_derives_conservative_default() {
        let cfg = ScheduleConfiguration::cron("*/10 * * * * *");
        let fd = cfg.to_fixed_delay_configuration();
        assert_eq!(fd.period, Duration::from_secs(60));
    }

    #[test]
    fn cron_with_fallback_uses_carried_value() {
        let fallback = FixedDelay::new(Duration::from_secs(1), Duration::from_secs(5));
        let cfg = ScheduleConfiguration::cron_with_fallback("*/10 * * * * *", fallback);
        let fd = cfg.to_fixed_delay_configuration();
        assert_eq!(fd.period, Duration::from_secs(5));
    }
}
