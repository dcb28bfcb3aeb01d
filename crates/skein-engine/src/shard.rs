//! Single-shard timeline operations.
//!
//! Every call goes through the [`OperationExecutor`], so health tracking,
//! failure classification and release happen uniformly.

use std::sync::Arc;

use bytes::Bytes;
use skein_pool::OperationExecutor;
use skein_store::{ListStore, StoreError};
use skein_types::{SENTINEL, ShardTarget, StoredValue, sentinel};
use tracing::{debug, warn};

use crate::error::EngineError;

/// Size of one replica's copy of a timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineLen {
    /// Values stored, the emptied-timeline marker included.
    pub stored: u64,
    /// Timeline entries, the marker excluded.
    pub entries: u64,
}

impl TimelineLen {
    /// Whether the replica holds the timeline at all.
    pub fn exists(&self) -> bool {
        self.stored > 0
    }
}

/// Timeline operations against one shard target at a time.
#[derive(Clone)]
pub struct TimelineShard {
    executor: Arc<OperationExecutor>,
}

impl TimelineShard {
    /// Create a shard client over `executor`.
    pub fn new(executor: Arc<OperationExecutor>) -> Self {
        Self { executor }
    }

    /// The executor every call runs through.
    pub fn executor(&self) -> &Arc<OperationExecutor> {
        &self.executor
    }

    /// Stored length of `key`, sentinel included. Zero when absent.
    pub async fn len(&self, target: &ShardTarget, key: &str) -> Result<u64, EngineError> {
        let len = self
            .executor
            .with_client(target, |conn| async move { conn.store().len(key).await })
            .await?;
        Ok(len)
    }

    /// Stored and entry counts of `key`. Only a single-value list can be the
    /// bare marker, so longer lists cost no extra read.
    pub async fn measure(
        &self,
        target: &ShardTarget,
        key: &str,
    ) -> Result<TimelineLen, EngineError> {
        let len = self
            .executor
            .with_client(target, |conn| async move {
                let store = conn.store();
                let stored = store.len(key).await?;
                let marker = stored == 1 && is_marker_head(store.range(key, 0, 0).await?);
                Ok(TimelineLen {
                    stored,
                    entries: stored - u64::from(marker),
                })
            })
            .await?;
        Ok(len)
    }

    /// Up to `count` raw values, newest first, skipping the newest `start`.
    pub async fn read_newest(
        &self,
        target: &ShardTarget,
        key: &str,
        start: u64,
        count: u64,
    ) -> Result<Vec<Bytes>, EngineError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        // Lists are oldest-first: the newest entries sit at negative indices.
        let first = to_index(start.saturating_add(count)).saturating_neg();
        let last = to_index(start).saturating_neg().saturating_sub(1);
        let mut values = self
            .executor
            .with_client(target, |conn| async move {
                conn.store().range(key, first, last).await
            })
            .await?;
        values.reverse();
        Ok(values)
    }

    /// Append `value` to `key` if the timeline exists, refreshing its
    /// expiration. Returns whether it existed.
    ///
    /// The first append to an emptied timeline also drops its marker.
    pub async fn append(
        &self,
        target: &ShardTarget,
        key: &str,
        value: &Bytes,
    ) -> Result<bool, EngineError> {
        let pushed = self
            .executor
            .with_client(target, |conn| async move {
                let store = conn.store();
                // Expire first: the push must be the last call, so a failed
                // job never holds an applied append that its retry repeats.
                if !store.expire(key, conn.params().expiration).await? {
                    return Ok(None);
                }
                let len = store
                    .push_back_if_exists(key, std::slice::from_ref(value))
                    .await?;
                Ok(Some(len))
            })
            .await?;
        let Some(len) = pushed else {
            debug!(%target, key, "timeline absent, append skipped");
            return Ok(false);
        };

        // Two values after one push: the first may be the marker of an
        // emptied timeline. The entry has landed either way, so a failure
        // here leaves a marker that readers skip and the next rebuild
        // meeting it clears.
        if len == 2 {
            let dropped = self
                .executor
                .with_client(target, |conn| async move { drop_marker(conn.store(), key).await })
                .await;
            if let Err(e) = dropped {
                warn!(%target, key, error = %e, "failed to drop emptied-timeline marker");
            }
        }
        Ok(true)
    }

    /// Remove every occurrence of `value` from `key`.
    pub async fn remove(
        &self,
        target: &ShardTarget,
        key: &str,
        value: &Bytes,
    ) -> Result<u64, EngineError> {
        let removed = self
            .executor
            .with_client(target, |conn| async move { conn.store().remove(key, value).await })
            .await?;
        Ok(removed)
    }

    /// Replace `key` with `values` (oldest first). An empty replacement
    /// leaves the sentinel so the timeline still exists.
    pub async fn replace(
        &self,
        target: &ShardTarget,
        key: &str,
        values: &[Bytes],
    ) -> Result<(), EngineError> {
        self.executor
            .with_client_keys(target, |conn| async move {
                let store = conn.store();
                store.delete(key).await?;
                if values.is_empty() {
                    store.push_back(key, &[sentinel()]).await?;
                } else {
                    store.push_back(key, values).await?;
                }
                store.expire(key, conn.params().expiration).await?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Delete `key`. Returns whether it existed.
    pub async fn delete(&self, target: &ShardTarget, key: &str) -> Result<bool, EngineError> {
        let existed = self
            .executor
            .with_client(target, |conn| async move { conn.store().delete(key).await })
            .await?;
        Ok(existed)
    }
}

/// Remove the emptied-timeline marker heading `key`, unless it is all the
/// list holds.
async fn drop_marker(store: &dyn ListStore, key: &str) -> Result<(), StoreError> {
    if store.len(key).await? > 1 && is_marker_head(store.range(key, 0, 0).await?) {
        store.remove(key, SENTINEL).await?;
    }
    Ok(())
}

fn is_marker_head(head: Vec<Bytes>) -> bool {
    head.first().is_some_and(|v| StoredValue::is_sentinel(v))
}

fn to_index(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
