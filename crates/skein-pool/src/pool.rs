//! One long-lived connection per backend host.
//!
//! Connections are opened lazily on first use, shared by every caller for
//! that host, and replaced only after the executor classifies a failure as
//! connection-level (or the health tracker reports the connection worn out).

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use skein_store::{ConnectionParams, Connector};
use skein_types::{PoolConfig, ShardTarget};
use tracing::{debug, error, info, warn};

use crate::connection::Connection;
use crate::error::PoolError;
use crate::health::HealthTracker;

/// Per-host connection pool gated by a [`HealthTracker`].
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    params: ConnectionParams,
    health: Arc<HealthTracker>,
    /// Pooled connections keyed by hostname.
    ///
    /// The lock is never held across an `.await`; connecting happens
    /// outside it and the result is installed with an entry check.
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    /// Create a pool that opens sessions through `connector`.
    pub fn new(config: &PoolConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            params: ConnectionParams::from(config),
            health: Arc::new(HealthTracker::new(config)),
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The health tracker this pool consults.
    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// The connection currently pooled for `host`, if any.
    pub fn pooled(&self, host: &str) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .expect("lock poisoned")
            .get(host)
            .cloned()
    }

    /// Number of pooled connections.
    pub fn len(&self) -> usize {
        self.connections.read().expect("lock poisoned").len()
    }

    /// Whether no connection is pooled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the connection for `target`'s host, opening one if needed.
    ///
    /// Fails with [`PoolError::BlackHole`] when the host is disabled or its
    /// pooled connection has failed too often; in the latter case the
    /// connection is discarded first so the next acquire opens a fresh one.
    pub async fn acquire(&self, target: &ShardTarget) -> Result<Arc<Connection>, PoolError> {
        let host = target.host.as_str();
        let existing = self.pooled(host);

        if self.health.is_unhealthy(host, existing.as_deref()) {
            if let Some(conn) = existing {
                self.discard(host, &conn).await;
            }
            debug!(%target, "host unavailable, failing fast");
            return Err(PoolError::BlackHole {
                host: host.to_string(),
            });
        }

        if let Some(conn) = existing {
            return Ok(conn);
        }

        let client = self
            .connector
            .connect(host, &self.params)
            .await
            .map_err(|source| PoolError::Connect {
                host: host.to_string(),
                source,
            })?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let fresh = Arc::new(Connection::new(id, host, self.params, client));

        let installed = {
            let mut map = self.connections.write().expect("lock poisoned");
            match map.entry(host.to_string()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => entry.insert(fresh.clone()).clone(),
            }
        };

        if Arc::ptr_eq(&installed, &fresh) {
            info!(host, connection = id, "opened connection");
        } else {
            // Another caller won the race for this host; ours is surplus.
            debug!(host, connection = id, "dropping duplicate connection");
            if let Err(e) = fresh.shutdown().await {
                debug!(host, error = %e, "failed to close duplicate connection");
            }
        }
        Ok(installed)
    }

    /// Shut `connection` down and remove it from the pool.
    ///
    /// Best-effort: shutdown errors are logged, never returned. A different
    /// connection pooled for the host in the meantime is left in place.
    pub async fn discard(&self, host: &str, connection: &Arc<Connection>) {
        {
            let mut map = self.connections.write().expect("lock poisoned");
            if map.get(host).is_some_and(|c| Arc::ptr_eq(c, connection)) {
                map.remove(host);
            }
        }
        if let Err(e) = connection.shutdown().await {
            warn!(host, connection = connection.id(), error = %e, "error shutting down discarded connection");
        }
        info!(host, connection = connection.id(), "discarded connection");
    }

    /// Hand a connection back after an operation. Returns whether it was
    /// still alive.
    ///
    /// Only checks liveness: a dead connection is reported but stays pooled.
    /// Discarding is decided by failure classification alone.
    pub fn release(&self, host: &str, connection: &Connection) -> bool {
        let alive = connection.is_alive();
        if !alive {
            error!(host, connection = connection.id(), "released connection is not alive");
        }
        alive
    }

    /// Shut down every pooled connection and empty the pool.
    ///
    /// Each shutdown is attempted independently; one failure does not stop
    /// the rest.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, Arc<Connection>)> = self
            .connections
            .write()
            .expect("lock poisoned")
            .drain()
            .collect();

        for (host, conn) in &drained {
            if let Err(e) = conn.shutdown().await {
                error!(%host, connection = conn.id(), error = %e, "failed to shut down connection");
            }
        }
        info!(count = drained.len(), "connection pool shut down");
    }
}
