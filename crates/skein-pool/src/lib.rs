//! Connection pooling, health tracking and the operation executor.
//!
//! This crate provides:
//!
//! - [`HealthTracker`] — per-host circuit breaker and per-connection error counts.
//! - [`ConnectionPool`] — one lazily opened connection per backend host,
//!   gated by the health tracker.
//! - [`OperationExecutor`] — runs every shard operation: acquire, execute,
//!   classify failures, discard broken connections, release, report timing.

pub mod connection;
pub mod error;
pub mod executor;
pub mod health;
pub mod pool;

pub use connection::Connection;
pub use error::{FailureKind, PoolError, classify};
pub use executor::{ExecutorStats, OperationExecutor, StatsSnapshot};
pub use health::{HealthTracker, HostHealth};
pub use pool::ConnectionPool;
