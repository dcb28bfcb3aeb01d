//! Core traits for the backend list engine.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use skein_types::PoolConfig;

use crate::error::StoreError;

/// Parameters a connection is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Per-call timeout the session should honour.
    pub timeout: Duration,
    /// Maximum in-flight calls on the session.
    pub pipeline: u32,
    /// Expiration applied to timelines written through the session.
    pub expiration: Duration,
}

impl From<&PoolConfig> for ConnectionParams {
    fn from(config: &PoolConfig) -> Self {
        Self {
            timeout: config.timeout(),
            pipeline: config.pipeline,
            expiration: config.expiration(),
        }
    }
}

/// List operations offered by one session to a backend host.
///
/// Indices follow the usual list-engine convention: `0` is the head (oldest
/// entry), negative indices count from the tail, `-1` being the last element.
/// Ranges are inclusive on both ends and clamped to the list bounds.
///
/// All implementations must be `Send + Sync`: concurrent callers share one
/// session per host.
#[async_trait::async_trait]
pub trait ListStore: Send + Sync {
    /// Number of values in the list, `0` if the key does not exist.
    async fn len(&self, key: &str) -> Result<u64, StoreError>;

    /// Values between `start` and `stop`, inclusive.
    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>, StoreError>;

    /// Delete the key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Append values at the tail, creating the list if needed. Returns the new length.
    async fn push_back(&self, key: &str, values: &[Bytes]) -> Result<u64, StoreError>;

    /// Append values at the tail only if the list exists.
    ///
    /// Returns the new length, or `0` when the list is absent and nothing was written.
    async fn push_back_if_exists(&self, key: &str, values: &[Bytes]) -> Result<u64, StoreError>;

    /// Push each value onto the head in turn, only if the list exists.
    ///
    /// `[x, y]` pushed onto `[a]` gives `[y, x, a]`. Returns the new length,
    /// or `0` when the list is absent.
    async fn push_front_if_exists(&self, key: &str, values: &[Bytes]) -> Result<u64, StoreError>;

    /// Remove every occurrence of `value`. Returns how many were removed.
    async fn remove(&self, key: &str, value: &[u8]) -> Result<u64, StoreError>;

    /// Set the key to expire after `ttl`. Returns whether the key exists.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Orderly shutdown of the session.
    async fn quit(&self) -> Result<(), StoreError>;

    /// Whether the session still considers itself usable.
    fn is_alive(&self) -> bool;
}

/// Opens sessions to backend hosts.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open a new session to `host`.
    async fn connect(
        &self,
        host: &str,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn ListStore>, StoreError>;
}
