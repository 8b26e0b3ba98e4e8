//! # pgforge-core
//!
//! Shared primitives consumed by the rest of the pgforge workspace:
//! the unified error type, typed configuration structs, the
//! PostgreSQL identifier validator, the fenced-lock interface the
//! scheduler drives, and per-node instance identification.

pub mod config;
pub mod error;
pub mod ident;
pub mod instance;
pub mod lock;

pub use error::{Error, Result};
pub use lock::{FencedLockManager, LockCallbacks};

/// The current version of pgforge.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
