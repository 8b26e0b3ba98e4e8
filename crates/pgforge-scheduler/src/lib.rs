//! # pgforge-scheduler
//!
//! A cluster-coordinated job scheduler: exactly one node in a fleet
//! runs each registered job at a time, arbitrated by a fenced lock
//! (4.B) rather than by the scheduler itself. Jobs are installed as
//! `pg_cron` entries when the extension is available, or run via an
//! in-process timer pool otherwise (4.E). The TTL manager (4.F) builds
//! on top of the same mechanism to expire rows on a schedule.

pub mod job;
pub mod scheduler;
pub mod testutil;
pub mod ttl;

pub use job::{ExecutorJob, FixedDelay, PgCronJob, ScheduleConfiguration, Task};
pub use scheduler::{Scheduler, SchedulerDeps};
pub use testutil::InMemoryFencedLock;
pub use ttl::{DefaultTtlJobAction, TTLJobAction, TtlManager};
