//! Per-host circuit breaker and per-connection error tracking.
//!
//! A host whose error count exceeds `host_error_limit` is disabled for
//! `auto_disable`. While disabled every operation against it fails fast.
//! The first health check after the window elapses re-enables the host and
//! clears its count. A connection whose own error count exceeds
//! `connection_error_limit` is reported unhealthy so the pool replaces it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use skein_types::PoolConfig;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::connection::Connection;

/// Health state of one host.
struct HostState {
    errors: AtomicU32,
    /// Serializes open/close transitions for this host.
    disabled_until: Mutex<Option<Instant>>,
}

/// Point-in-time view of a host's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostHealth {
    /// Failures since the last success or re-enable.
    pub errors: u32,
    /// When the host becomes usable again, if it is disabled.
    pub disabled_until: Option<Instant>,
}

/// Tracks error rates and decides when hosts and connections are unusable.
pub struct HealthTracker {
    host_error_limit: u32,
    connection_error_limit: u32,
    auto_disable: Duration,
    /// Entries are created on first failure and never removed.
    hosts: RwLock<HashMap<String, Arc<HostState>>>,
}

impl HealthTracker {
    /// Create a tracker with the limits from `config`.
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            host_error_limit: config.host_error_limit,
            connection_error_limit: config.connection_error_limit,
            auto_disable: config.auto_disable(),
            hosts: RwLock::new(HashMap::new()),
        }
    }

    fn existing(&self, host: &str) -> Option<Arc<HostState>> {
        self.hosts.read().expect("lock poisoned").get(host).cloned()
    }

    fn get_or_create(&self, host: &str) -> Arc<HostState> {
        if let Some(state) = self.existing(host) {
            return state;
        }
        // Racing first failures all land on the same entry.
        self.hosts
            .write()
            .expect("lock poisoned")
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(HostState {
                    errors: AtomicU32::new(0),
                    disabled_until: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Record a failed operation against `host`, and against `connection`
    /// when one was acquired.
    pub fn record_failure(&self, host: &str, connection: Option<&Connection>) {
        let state = self.get_or_create(host);
        let errors = state.errors.fetch_add(1, Ordering::AcqRel) + 1;

        if errors > self.host_error_limit {
            let now = Instant::now();
            let mut disabled_until = state.disabled_until.lock().expect("lock poisoned");
            // Failures from calls already in flight must not extend the window.
            if disabled_until.is_none_or(|until| until <= now) {
                *disabled_until = Some(now + self.auto_disable);
                warn!(
                    host,
                    errors,
                    limit = self.host_error_limit,
                    disable_secs = self.auto_disable.as_secs(),
                    "host error limit exceeded, disabling host"
                );
            }
        }

        if let Some(conn) = connection {
            let conn_errors = conn.record_error();
            if conn_errors > self.connection_error_limit {
                warn!(
                    host,
                    connection = conn.id(),
                    errors = conn_errors,
                    limit = self.connection_error_limit,
                    "connection error limit exceeded"
                );
            }
        }
    }

    /// Record a successful operation: clears the host and connection counts.
    pub fn record_success(&self, host: &str, connection: Option<&Connection>) {
        if let Some(state) = self.existing(host) {
            state.errors.store(0, Ordering::Release);
        }
        if let Some(conn) = connection {
            conn.reset_errors();
        }
    }

    /// Whether `host` is disabled or `connection` has failed too often.
    ///
    /// A host whose disable window has elapsed is re-enabled here, with its
    /// error count cleared, under the host's transition lock.
    pub fn is_unhealthy(&self, host: &str, connection: Option<&Connection>) -> bool {
        let host_disabled = match self.existing(host) {
            None => false,
            Some(state) => {
                let mut disabled_until = state.disabled_until.lock().expect("lock poisoned");
                match *disabled_until {
                    Some(until) if Instant::now() < until => true,
                    Some(_) => {
                        *disabled_until = None;
                        state.errors.store(0, Ordering::Release);
                        info!(host, "disable window elapsed, re-enabling host");
                        false
                    }
                    None => false,
                }
            }
        };

        let connection_worn =
            connection.is_some_and(|conn| conn.error_count() > self.connection_error_limit);

        host_disabled || connection_worn
    }

    /// Current health of `host`, without side effects.
    pub fn host_health(&self, host: &str) -> HostHealth {
        match self.existing(host) {
            Some(state) => HostHealth {
                errors: state.errors.load(Ordering::Acquire),
                disabled_until: *state.disabled_until.lock().expect("lock poisoned"),
            },
            None => HostHealth {
                errors: 0,
                disabled_until: None,
            },
        }
    }
}
