//! Mapping timeline keys to the shards that hold them.

use skein_types::ShardTarget;
use tracing::debug;

use crate::error::EngineError;

/// Resolves a timeline key to its replica set.
pub trait ShardResolver: Send + Sync {
    /// The shards holding `key`. The first is the primary.
    fn resolve(&self, key: &str) -> Vec<ShardTarget>;
}

/// A fixed set of replica groups; each key lives on every shard of one group.
///
/// The group is chosen by hashing the key with blake3 and taking the first
/// eight bytes modulo the number of groups.
#[derive(Debug, Clone)]
pub struct ReplicaRing {
    groups: Vec<Vec<ShardTarget>>,
}

impl ReplicaRing {
    /// Build a ring from non-empty replica groups.
    pub fn new(groups: Vec<Vec<ShardTarget>>) -> Result<Self, EngineError> {
        if groups.is_empty() {
            return Err(EngineError::InvalidLayout("no replica groups".into()));
        }
        if let Some(i) = groups.iter().position(|g| g.is_empty()) {
            return Err(EngineError::InvalidLayout(format!(
                "replica group {i} is empty"
            )));
        }
        for (i, group) in groups.iter().enumerate() {
            for (j, target) in group.iter().enumerate() {
                if group[..j].contains(target) {
                    return Err(EngineError::InvalidLayout(format!(
                        "replica group {i} lists {target} twice"
                    )));
                }
            }
        }
        debug!(groups = groups.len(), "built replica ring");
        Ok(Self { groups })
    }

    /// The configured groups.
    pub fn groups(&self) -> &[Vec<ShardTarget>] {
        &self.groups
    }

    /// Index of the group owning `key`.
    pub fn group_of(&self, key: &str) -> usize {
        (key_position(key) % self.groups.len() as u64) as usize
    }
}

impl ShardResolver for ReplicaRing {
    fn resolve(&self, key: &str) -> Vec<ShardTarget> {
        self.groups[self.group_of(key)].clone()
    }
}

/// blake3(key) truncated to u64.
fn key_position(key: &str) -> u64 {
    let hash = blake3::hash(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}
