//! Unified error types for pgforge using thiserror.
//!
//! Provides consistent error handling across the scheduler, the TTL
//! manager, the subscription engine and their repositories.

use thiserror::Error;

/// The unified error type for pgforge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected by the identifier validator (4.A). Fatal at the call
    /// site; callers must never pass the rejected name through to SQL.
    #[error("invalid identifier {name:?}{}", context.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
    InvalidIdentifier {
        name: String,
        context: Option<String>,
    },

    /// `pg_cron` is installed as an extension but not present in
    /// `shared_preload_libraries`. Downgrades `pg_cron_available` for
    /// the session; never escalated.
    #[error("pg_cron is not loaded via shared_preload_libraries")]
    ExtensionNotLoaded,

    /// Connection/IO fault during scheduling, purge or polling.
    /// Logged at DEBUG when `is_io` is true, WARN otherwise; never
    /// rethrown to the caller of a background operation.
    #[error("database error: {message}")]
    Database {
        message: String,
        is_io: bool,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An in-process job task body returned an error. Caught by the
    /// scheduler's task wrapper and logged; the next tick still runs.
    #[error("job task {name} failed: {message}")]
    JobTaskFailure { name: String, message: String },

    /// A batched subscription's per-event handler returned an error.
    /// The event is skipped and demand is restored with `request(1)`.
    #[error("subscription {subscriber_id} event handler failed: {message}")]
    SubscriptionEventFailure {
        subscriber_id: String,
        message: String,
    },

    /// The subscription's drain sleep on `stop()` was interrupted.
    #[error("subscription shutdown interrupted")]
    SubscriptionShutdownInterrupted,

    /// Configuration is structurally invalid (e.g. zero-sized batch).
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Migration application failed.
    #[error("migration error: {message}")]
    Migration { message: String },

    /// Catch-all for conditions that don't fit the above and aren't
    /// part of the documented taxonomy.
    #[error("internal error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn invalid_identifier(name: impl Into<String>) -> Self {
        Error::InvalidIdentifier {
            name: name.into(),
            context: None,
        }
    }

    pub fn invalid_identifier_in(name: impl Into<String>, context: impl Into<String>) -> Self {
        Error::InvalidIdentifier {
            name: name.into(),
            context: Some(context.into()),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Error::Database {
            message: message.into(),
            is_io: false,
            source: None,
        }
    }

    pub fn database_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Database {
            message: message.into(),
            is_io: false,
            source: Some(Box::new(source)),
        }
    }

    /// Build a `Database` error with an explicit IO classification.
    /// Used by repositories (in `pgforge-db`) that can inspect the
    /// underlying driver error to decide DEBUG-vs-WARN routing per §7.
    pub fn database_classified(
        message: impl Into<String>,
        is_io: bool,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Database {
            message: message.into(),
            is_io,
            source: Some(Box::new(source)),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error represents a transient condition that a
    /// caller may retry (§7 `TransientIO`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Database { .. })
    }

    /// Whether a `Database` error should be logged at DEBUG (IO fault)
    /// rather than WARN, per §4.E "Failures".
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Database { is_io: true, .. })
    }
}

/// Result type alias for pgforge operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_identifier_formats_context() {
        let err = Error::invalid_identifier_in("select", "function name");
        assert_eq!(
            err.to_string(),
            "invalid identifier \"select\" (function name)"
        );
    }

    #[test]
    fn database_is_retryable() {
        assert!(Error::database("connection reset").is_retryable());
        assert!(!Error::invalid_identifier("select").is_retryable());
    }

    #[test]
    fn io_classification_drives_log_level() {
        let io_err = Error::Database {
            message: "timeout".into(),
            is_io: true,
            source: None,
        };
        assert!(io_err.is_io());

        let other_err = Error::Database {
            message: "constraint violation".into(),
            is_io: false,
            source: None,
        };
        assert!(!other_err.is_io());
    }
}
