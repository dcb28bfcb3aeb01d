//! TOML configuration for the Skein daemon.
//!
//! Every section has defaults, so an empty file (or no file at all) yields
//! a usable in-memory cluster layout.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use skein_types::{JobConfig, PoolConfig, ShardTarget};

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Connection pool and circuit breaker tuning.
    pub pool: PoolConfig,
    /// Replica layout.
    pub cluster: ClusterSection,
    /// Job dispatch and retries.
    pub jobs: JobConfig,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[cluster]` section.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Replica groups, each a list of `host/shard` targets. Every timeline
    /// lives on all targets of one group; the first target is the primary.
    pub replica_groups: Vec<Vec<String>>,
}

impl Default for ClusterSection {
    fn default() -> Self {
        let group = |n: usize| {
            vec![
                format!("redis-{:02}/timeline_{n:03}", 2 * n + 1),
                format!("redis-{:02}/timeline_{n:03}", 2 * n + 2),
            ]
        };
        Self {
            replica_groups: (0..2).map(group).collect(),
        }
    }
}

/// `[log]` section.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)
                    .with_context(|| format!("failed to parse {}", p.display()))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Parsed replica groups.
    pub fn replica_groups(&self) -> anyhow::Result<Vec<Vec<ShardTarget>>> {
        self.cluster
            .replica_groups
            .iter()
            .enumerate()
            .map(|(i, group)| {
                group
                    .iter()
                    .map(|t| t.parse::<ShardTarget>())
                    .collect::<Result<Vec<_>, _>>()
                    .with_context(|| format!("invalid target in replica group {i}"))
            })
            .collect()
    }
}
