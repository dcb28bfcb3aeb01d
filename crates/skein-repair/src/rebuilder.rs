//! Anti-entropy rebuild of one replica from another.
//!
//! Both lists are stored oldest-first. A replica that missed writes holds a
//! suffix of its peer (appends only land on lists that already exist), so
//! the rebuild only has to copy the older entries it lacks in front of what
//! it has. An empty replica, or one holding only the emptied-timeline
//! marker, gets a full copy.

use std::sync::Arc;

use bytes::Bytes;
use skein_pool::OperationExecutor;
use skein_types::{SENTINEL, ShardTarget, StoredValue, sentinel};
use tracing::{debug, info, warn};

use crate::error::RepairError;
use crate::plan::RebuildPlan;

/// Result of one rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildOutcome {
    /// The plan that was carried out.
    pub plan: RebuildPlan,
    /// Entries written to the destination.
    pub transferred: usize,
}

/// Copies missing timeline entries between replicas through the executor.
pub struct AntiEntropyRebuilder {
    executor: Arc<OperationExecutor>,
}

impl AntiEntropyRebuilder {
    /// Create a rebuilder that runs every call through `executor`.
    pub fn new(executor: Arc<OperationExecutor>) -> Self {
        Self { executor }
    }

    /// Bring `dest`'s copy of `key` up to date with `source`'s.
    ///
    /// Reads both lengths, then transfers according to [`RebuildPlan`]. An
    /// up-to-date destination costs the two length calls and nothing else,
    /// plus one head read when the destination holds a single value.
    #[tracing::instrument(skip(self), fields(plan = tracing::field::Empty))]
    pub async fn rebuild(
        &self,
        key: &str,
        source: &ShardTarget,
        dest: &ShardTarget,
    ) -> Result<RebuildOutcome, RepairError> {
        if source == dest {
            return Err(RepairError::SameReplica(source.clone()));
        }

        let dest_len = self.entry_len(dest, key).await?;
        let source_len = self.len(source, key).await?;
        let plan = RebuildPlan::compute(dest_len, source_len);
        tracing::Span::current().record("plan", tracing::field::display(plan));

        let transferred = match plan {
            RebuildPlan::UpToDate => {
                debug!(dest_len, source_len, "replica up to date");
                0
            }
            RebuildPlan::Full => self.full(key, source, dest).await?,
            RebuildPlan::Tail { missing } => {
                self.tail(key, source, dest, dest_len, source_len, missing)
                    .await?
            }
        };

        if !plan.is_noop() {
            info!(transferred, "replica rebuilt");
        }
        Ok(RebuildOutcome { plan, transferred })
    }

    async fn len(&self, target: &ShardTarget, key: &str) -> Result<u64, RepairError> {
        let len = self
            .executor
            .with_client(target, |conn| async move { conn.store().len(key).await })
            .await?;
        Ok(len)
    }

    /// Entries of `key` on `target`, not counting the emptied-timeline marker.
    ///
    /// Writers never leave the marker next to an entry, so only a
    /// single-value list needs its head looked at.
    async fn entry_len(&self, target: &ShardTarget, key: &str) -> Result<u64, RepairError> {
        let len = self
            .executor
            .with_client(target, |conn| async move {
                let store = conn.store();
                let len = store.len(key).await?;
                if len != 1 {
                    return Ok(len);
                }
                let head = store.range(key, 0, 0).await?;
                Ok(if head.iter().any(|v| StoredValue::is_sentinel(v)) { 0 } else { 1 })
            })
            .await?;
        Ok(len)
    }

    /// Drop a marker left in front of the source's entries.
    async fn strip_source_marker(&self, key: &str, source: &ShardTarget) {
        let stripped = self
            .executor
            .with_client(source, |conn| async move { conn.store().remove(key, SENTINEL).await })
            .await;
        match stripped {
            Ok(removed) => debug!(%source, removed, "removed stray marker from source"),
            Err(e) => warn!(%source, error = %e, "failed to remove stray marker from source"),
        }
    }

    /// Replace the destination with the whole source.
    async fn full(
        &self,
        key: &str,
        source: &ShardTarget,
        dest: &ShardTarget,
    ) -> Result<usize, RepairError> {
        let values = self
            .executor
            .with_client_keys(source, |conn| async move { conn.store().range(key, 0, -1).await })
            .await?;
        let (entries, marked) = without_sentinel(values);
        let transferred = entries.len();

        self.executor
            .with_client_keys(dest, |conn| async move {
                let store = conn.store();
                store.delete(key).await?;
                // The sentinel creates the list so the conditional prepends land.
                store.push_back(key, &[sentinel()]).await?;
                if !entries.is_empty() {
                    store.push_front_if_exists(key, &reversed(entries)).await?;
                    store.remove(key, SENTINEL).await?;
                }
                store.expire(key, conn.params().expiration).await?;
                Ok(())
            })
            .await?;

        if transferred == 0 {
            debug!("source is empty, destination left with sentinel only");
        } else if marked {
            self.strip_source_marker(key, source).await;
        }
        Ok(transferred)
    }

    /// Prepend the source entries older than the destination's oldest.
    async fn tail(
        &self,
        key: &str,
        source: &ShardTarget,
        dest: &ShardTarget,
        dest_len: u64,
        source_len: u64,
        missing: u64,
    ) -> Result<usize, RepairError> {
        // Counted from the newest entry. An append to the source between the
        // length read and this read shifts the window by one, and the entry
        // prepended may then duplicate one the destination already holds.
        let start = -to_index(source_len);
        let stop = -(to_index(dest_len).saturating_add(1));
        let values = self
            .executor
            .with_client(source, |conn| async move {
                conn.store().range(key, start, stop).await
            })
            .await?;
        let (entries, marked) = without_sentinel(values);
        debug!(missing, read = entries.len(), "transferring missing entries");
        if marked {
            self.strip_source_marker(key, source).await;
        }
        if entries.is_empty() {
            return Ok(0);
        }
        let transferred = entries.len();

        self.executor
            .with_client(dest, |conn| async move {
                conn.store()
                    .push_front_if_exists(key, &reversed(entries))
                    .await?;
                Ok(())
            })
            .await?;
        Ok(transferred)
    }
}

/// The values other than the marker, and whether the marker was among them.
fn without_sentinel(values: Vec<Bytes>) -> (Vec<Bytes>, bool) {
    let before = values.len();
    let entries: Vec<Bytes> = values
        .into_iter()
        .filter(|v| !StoredValue::is_sentinel(v))
        .collect();
    let marked = entries.len() < before;
    (entries, marked)
}

fn to_index(len: u64) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

/// Head-pushes insert one value at a time, so the oldest must go last.
fn reversed(mut entries: Vec<Bytes>) -> Vec<Bytes> {
    entries.reverse();
    entries
}
