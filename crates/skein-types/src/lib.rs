//! Shared types and configuration for Skein.
//!
//! This crate defines the types used across the Skein workspace:
//! physical shard addressing ([`ShardTarget`]), the stored form of timeline
//! entries ([`TimelineEntry`], [`StoredValue`], the sentinel marker), and
//! configuration for the connection pool ([`PoolConfig`]) and the job layer
//! ([`JobConfig`]).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod entry;

pub use entry::{EntryError, SENTINEL, StoredValue, TimelineEntry, sentinel};

// ---------------------------------------------------------------------------
// Shard addressing
// ---------------------------------------------------------------------------

/// One physical backend location: a hostname plus a shard identifier.
///
/// Resolved by the sharding layer and never mutated afterwards. Formatted
/// and parsed as `host/shard`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardTarget {
    /// Backend host the shard lives on (also the connection pool key).
    pub host: String,
    /// Shard identifier on that host.
    pub shard: String,
}

impl ShardTarget {
    /// Create a target from a host and shard identifier.
    pub fn new(host: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            shard: shard.into(),
        }
    }
}

impl fmt::Display for ShardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.shard)
    }
}

/// Error returned when a `host/shard` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid shard target {0:?}: expected \"host/shard\"")]
pub struct ParseTargetError(pub String);

impl FromStr for ShardTarget {
    type Err = ParseTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((host, shard)) if !host.is_empty() && !shard.is_empty() => {
                Ok(Self::new(host, shard))
            }
            _ => Err(ParseTargetError(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection pool and health tracking parameters.
///
/// Every field has a default, so a partial `[pool]` TOML section is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Per-call timeout for single-timeline operations, in milliseconds.
    pub timeout_ms: u64,
    /// Timeout for list-wide operations (full range reads, store, delete).
    pub keys_timeout_ms: u64,
    /// How long a timeline lives after its last write, in seconds.
    pub expiration_secs: u64,
    /// Maximum number of in-flight calls on one connection.
    pub pipeline: u32,
    /// Host failures tolerated before the host is disabled.
    pub host_error_limit: u32,
    /// Failures tolerated on one connection before it is replaced.
    pub connection_error_limit: u32,
    /// How long a host stays disabled once its error limit is exceeded.
    pub auto_disable_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 200,
            keys_timeout_ms: 5_000,
            expiration_secs: 7 * 24 * 3600, // one week
            pipeline: 100,
            host_error_limit: 20,
            connection_error_limit: 5,
            auto_disable_secs: 60,
        }
    }
}

impl PoolConfig {
    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Timeout for list-wide operations.
    pub fn keys_timeout(&self) -> Duration {
        Duration::from_millis(self.keys_timeout_ms)
    }

    /// Timeline expiration after the last write.
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    /// How long a host stays circuit-open.
    pub fn auto_disable(&self) -> Duration {
        Duration::from_secs(self.auto_disable_secs)
    }
}

/// Job dispatch and retry parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Attempts after the first before a job is parked in the error queue.
    pub max_retries: u32,
    /// Pause between attempts of the same job, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Maximum number of jobs running at once.
    pub concurrency: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_backoff_ms: 50,
            concurrency: 64,
        }
    }
}

impl JobConfig {
    /// Pause between attempts.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
