//! Runs operations against a shard through the pool.
//!
//! [`OperationExecutor::with_client`] is the single entry point every shard
//! operation goes through. It:
//!
//! 1. Acquires the host's connection (timed). A [`PoolError::BlackHole`] is
//!    returned as-is: the circuit is already open, so it is not recorded
//!    again. Any other acquisition error is recorded as a host failure.
//! 2. Runs the caller's work under the per-call deadline, holding one
//!    pipeline slot on the connection.
//! 3. Releases the connection exactly once, whatever happened, through a
//!    drop guard that also covers panics and cancelled futures. Release
//!    comes before classification so it never sees a connection this call
//!    is about to discard.
//! 4. Classifies a failure: connection faults discard the connection,
//!    timeouts and unclassified errors keep it. All are recorded.
//! 5. Records a success when the work succeeded.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use skein_store::{Connector, StoreError};
use skein_types::{PoolConfig, ShardTarget};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{FailureKind, PoolError, classify};
use crate::health::HealthTracker;
use crate::pool::ConnectionPool;

/// Running totals kept by an [`OperationExecutor`].
#[derive(Default)]
pub struct ExecutorStats {
    acquire_attempts: AtomicU64,
    acquired: AtomicU64,
    acquire_micros: AtomicU64,
    releases: AtomicU64,
    release_micros: AtomicU64,
    dead_releases: AtomicU64,
    successes: AtomicU64,
    black_holes: AtomicU64,
    acquire_failures: AtomicU64,
    connection_faults: AtomicU64,
    timeouts: AtomicU64,
    unclassified: AtomicU64,
}

/// Point-in-time copy of [`ExecutorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Calls to `acquire`.
    pub acquire_attempts: u64,
    /// Acquisitions that returned a connection.
    pub acquired: u64,
    /// Total time spent acquiring, in microseconds.
    pub acquire_micros: u64,
    /// Connections released.
    pub releases: u64,
    /// Total time spent releasing, in microseconds.
    pub release_micros: u64,
    /// Releases of a connection that was no longer alive.
    pub dead_releases: u64,
    /// Operations that succeeded.
    pub successes: u64,
    /// Operations refused because the host was disabled.
    pub black_holes: u64,
    /// Acquisitions that failed for another reason.
    pub acquire_failures: u64,
    /// Operations failed with a connection-level error.
    pub connection_faults: u64,
    /// Operations that timed out.
    pub timeouts: u64,
    /// Operations failed with any other error.
    pub unclassified: u64,
}

impl ExecutorStats {
    /// Copy the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            acquire_attempts: load(&self.acquire_attempts),
            acquired: load(&self.acquired),
            acquire_micros: load(&self.acquire_micros),
            releases: load(&self.releases),
            release_micros: load(&self.release_micros),
            dead_releases: load(&self.dead_releases),
            successes: load(&self.successes),
            black_holes: load(&self.black_holes),
            acquire_failures: load(&self.acquire_failures),
            connection_faults: load(&self.connection_faults),
            timeouts: load(&self.timeouts),
            unclassified: load(&self.unclassified),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn add_time(counter: &AtomicU64, elapsed: Duration) {
        counter.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }
}

/// Releases an acquired connection when dropped.
struct Lease<'a> {
    pool: &'a ConnectionPool,
    stats: &'a ExecutorStats,
    conn: Arc<Connection>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let started = Instant::now();
        if !self.pool.release(self.conn.host(), &self.conn) {
            ExecutorStats::bump(&self.stats.dead_releases);
        }
        ExecutorStats::bump(&self.stats.releases);
        ExecutorStats::add_time(&self.stats.release_micros, started.elapsed());
    }
}

/// Executes shard operations with health tracking and failure classification.
pub struct OperationExecutor {
    pool: Arc<ConnectionPool>,
    timeout: Duration,
    keys_timeout: Duration,
    stats: ExecutorStats,
}

impl OperationExecutor {
    /// Create an executor over an existing pool.
    pub fn new(config: &PoolConfig, pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            timeout: config.timeout(),
            keys_timeout: config.keys_timeout(),
            stats: ExecutorStats::default(),
        }
    }

    /// Create a pool over `connector` and an executor over that pool.
    pub fn from_config(config: &PoolConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        let pool = Arc::new(ConnectionPool::new(config, connector));
        Arc::new(Self::new(config, pool))
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// The health tracker shared with the pool.
    pub fn health(&self) -> &Arc<HealthTracker> {
        self.pool.health()
    }

    /// Running totals.
    pub fn stats(&self) -> &ExecutorStats {
        &self.stats
    }

    /// Run `work` against `target`'s connection under the per-call timeout.
    pub async fn with_client<T, F, Fut>(&self, target: &ShardTarget, work: F) -> Result<T, PoolError>
    where
        F: FnOnce(Arc<Connection>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.run(target, self.timeout, work).await
    }

    /// Like [`with_client`](Self::with_client), under the longer timeout used
    /// for list-wide operations.
    pub async fn with_client_keys<T, F, Fut>(
        &self,
        target: &ShardTarget,
        work: F,
    ) -> Result<T, PoolError>
    where
        F: FnOnce(Arc<Connection>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.run(target, self.keys_timeout, work).await
    }

    async fn run<T, F, Fut>(
        &self,
        target: &ShardTarget,
        deadline: Duration,
        work: F,
    ) -> Result<T, PoolError>
    where
        F: FnOnce(Arc<Connection>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let host = target.host.as_str();

        let started = Instant::now();
        ExecutorStats::bump(&self.stats.acquire_attempts);
        let acquired = self.pool.acquire(target).await;
        ExecutorStats::add_time(&self.stats.acquire_micros, started.elapsed());

        let conn = match acquired {
            Ok(conn) => conn,
            Err(e @ PoolError::BlackHole { .. }) => {
                ExecutorStats::bump(&self.stats.black_holes);
                return Err(e);
            }
            Err(e) => {
                ExecutorStats::bump(&self.stats.acquire_failures);
                self.pool.health().record_failure(host, None);
                debug!(%target, error = %e, "failed to acquire connection");
                return Err(e);
            }
        };
        ExecutorStats::bump(&self.stats.acquired);

        let lease = Lease {
            pool: &self.pool,
            stats: &self.stats,
            conn: conn.clone(),
        };

        let outcome = match conn.pipeline_slot().await {
            Ok(_slot) => match tokio::time::timeout(deadline, work(conn.clone())).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(deadline)),
            },
            Err(e) => Err(e),
        };

        drop(lease);

        match outcome {
            Ok(value) => {
                ExecutorStats::bump(&self.stats.successes);
                self.pool.health().record_success(host, Some(&conn));
                Ok(value)
            }
            Err(error) => Err(self.on_failure(target, &conn, error).await),
        }
    }

    /// Record a failed operation and apply its connection policy.
    async fn on_failure(
        &self,
        target: &ShardTarget,
        conn: &Arc<Connection>,
        error: StoreError,
    ) -> PoolError {
        let host = target.host.clone();
        let health = self.pool.health();

        match classify(&error) {
            FailureKind::ConnectionFault => {
                ExecutorStats::bump(&self.stats.connection_faults);
                warn!(%target, connection = conn.id(), error = %error, "connection fault, discarding connection");
                health.record_failure(&host, Some(conn));
                self.pool.discard(&host, conn).await;
                PoolError::ConnectionFault {
                    host,
                    source: error,
                }
            }
            FailureKind::Timeout => {
                ExecutorStats::bump(&self.stats.timeouts);
                let after = match error {
                    StoreError::Timeout(after) if !after.is_zero() => after,
                    _ => conn.params().timeout,
                };
                debug!(%target, ?after, "operation timed out");
                health.record_failure(&host, Some(conn));
                PoolError::Timeout { host, after }
            }
            FailureKind::Unclassified => {
                ExecutorStats::bump(&self.stats.unclassified);
                warn!(%target, error = %error, "operation failed");
                health.record_failure(&host, Some(conn));
                PoolError::Unclassified {
                    host,
                    source: error,
                }
            }
        }
    }
}
