//! Configuration structs for the pgforge components.
//!
//! Each config is a plain serde-derived struct with a sensible
//! `Default`, following the shape used throughout this workspace:
//! typed sub-configs with `Duration`-returning helper methods rather
//! than raw integer fields sprinkled through call sites.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_min: u32,
    pub pool_max: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/pgforge".to_string(),
            pool_min: 1,
            pool_max: 10,
            connect_timeout_secs: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Scheduler configuration (4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Name of the fenced lock this node contends for leadership on.
    pub lock_name: String,
    /// Maximum number of in-process job ticks allowed to run at once.
    pub max_concurrent_ticks: usize,
    /// How often the scheduler probes `pg_cron` availability again
    /// after a failed probe, expressed as a startup-only flag: once
    /// disabled for a start cycle, it stays disabled until restart.
    pub probe_pg_cron_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_name: "pgforge-scheduler".to_string(),
            max_concurrent_ticks: 8,
            probe_pg_cron_on_start: true,
        }
    }
}

/// TTL manager configuration (4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Name of the PL/pgSQL delete function installed on start.
    pub ttl_function_name: String,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            ttl_function_name: "pgforge_ttl_delete".to_string(),
        }
    }
}

/// Batched subscription configuration (4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Upper bound on events delivered to the handler per batch.
    pub max_batch_size: usize,
    /// Upper bound on wall-clock time a batch may accumulate before
    /// being flushed, even if `max_batch_size` hasn't been reached.
    pub max_latency_ms: u64,
    /// Number of events requested from the event store per poll.
    pub poll_batch_size: u32,
    /// Interval between polls when the store has no demand pending.
    pub poll_interval_ms: u64,
    /// Drain window observed on `stop()` before persisting the resume
    /// point, so in-flight handler callbacks can settle.
    pub stop_drain_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_latency_ms: 1000,
            poll_batch_size: 100,
            poll_interval_ms: 250,
            stop_drain_ms: 500,
        }
    }
}

impl SubscriptionConfig {
    pub fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_drain(&self) -> Duration {
        Duration::from_millis(self.stop_drain_ms)
    }
}

/// Logging configuration, wired up by the embedding application via
/// `tracing_subscriber`; pgforge itself only emits `tracing` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.lock_name, "pgforge-scheduler");
        assert!(cfg.max_concurrent_ticks > 0);
    }

    #[test]
    fn subscription_config_durations() {
        let cfg = SubscriptionConfig::default();
        assert_eq!(cfg.max_latency(), Duration::from_millis(1000));
        assert_eq!(cfg.stop_drain(), Duration::from_millis(500));
    }

    #[test]
    fn serializes_round_trip() {
        let cfg = TtlConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: TtlConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.ttl_function_name, back.ttl_function_name);
    }
}
