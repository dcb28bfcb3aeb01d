//! The timeline service: fan-out writes, replica-aware reads and rebuilds.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use skein_pool::OperationExecutor;
use skein_repair::{AntiEntropyRebuilder, RebuildOutcome};
use skein_types::{JobConfig, ShardTarget, StoredValue, TimelineEntry};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::resolver::ShardResolver;
use crate::scheduler::{DispatchReport, Job, JobOp, JobScheduler};
use crate::shard::{TimelineLen, TimelineShard};

/// Size of one replica, or why it could not be measured.
type ReplicaLen = (ShardTarget, Result<TimelineLen, EngineError>);

/// Timelines spread over replicated list-store shards.
pub struct TimelineService {
    resolver: Arc<dyn ShardResolver>,
    shard: TimelineShard,
    rebuilder: AntiEntropyRebuilder,
    scheduler: JobScheduler,
}

impl TimelineService {
    /// Create a service resolving keys with `resolver` and running every
    /// backend call through `executor`.
    pub fn new(
        resolver: Arc<dyn ShardResolver>,
        executor: Arc<OperationExecutor>,
        jobs: &JobConfig,
    ) -> Self {
        let shard = TimelineShard::new(executor.clone());
        Self {
            resolver,
            rebuilder: AntiEntropyRebuilder::new(executor),
            scheduler: JobScheduler::new(jobs, shard.clone()),
            shard,
        }
    }

    /// The executor every backend call runs through.
    pub fn executor(&self) -> &Arc<OperationExecutor> {
        self.shard.executor()
    }

    /// The job scheduler.
    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// Append `entry` to the timelines `key_prefix + id` for every id.
    ///
    /// Only timelines that already exist grow. One job runs per shard
    /// target, covering every key that target holds.
    pub async fn append<I: Display>(
        &self,
        entry: &TimelineEntry,
        key_prefix: &str,
        ids: &[I],
    ) -> DispatchReport {
        let op = JobOp::Append(entry.encode());
        self.fan_out(op, keys(key_prefix, ids)).await
    }

    /// Remove `entry` from the timelines `key_prefix + id` for every id.
    pub async fn remove<I: Display>(
        &self,
        entry: &TimelineEntry,
        key_prefix: &str,
        ids: &[I],
    ) -> DispatchReport {
        let op = JobOp::Remove(entry.encode());
        self.fan_out(op, keys(key_prefix, ids)).await
    }

    /// Replace timeline `key` on every replica with `entries`, oldest first.
    ///
    /// An empty `entries` leaves an existing but empty timeline.
    pub async fn store(&self, key: &str, entries: &[TimelineEntry]) -> DispatchReport {
        let values: Vec<Bytes> = entries.iter().map(TimelineEntry::encode).collect();
        self.fan_out(JobOp::Replace(values), vec![key.to_string()])
            .await
    }

    /// Delete timeline `key` from every replica.
    pub async fn delete_timeline(&self, key: &str) -> DispatchReport {
        self.fan_out(JobOp::Delete, vec![key.to_string()]).await
    }

    /// Read up to `count` entries of `key`, newest first, skipping the
    /// newest `start`.
    ///
    /// Returns `None` when no replica holds the timeline. A replica with
    /// fewer entries than its longest peer, or without the timeline at all,
    /// is rebuilt before the read. Tombstones are
    /// dropped unless `include_deleted` is set, so fewer than `count`
    /// entries may come back.
    pub async fn get(
        &self,
        key: &str,
        start: u64,
        count: u64,
        include_deleted: bool,
    ) -> Result<Option<Vec<TimelineEntry>>, EngineError> {
        let lens = self.replica_lens(key).await?;
        let Some(longest) = longest(&lens) else {
            return Ok(None);
        };

        // Readable replicas in resolver order: up to date, or just rebuilt.
        let mut readable = Vec::new();
        for (target, len) in &lens {
            match len {
                Ok(len) if !is_behind(len, &longest.1) => readable.push(target),
                Ok(len) => {
                    debug!(
                        %target,
                        key,
                        entries = len.entries,
                        longest = longest.1.entries,
                        "replica is behind, rebuilding"
                    );
                    match self.rebuilder.rebuild(key, &longest.0, target).await {
                        Ok(_) => readable.push(target),
                        Err(e) => warn!(%target, key, error = %e, "rebuild before read failed"),
                    }
                }
                Err(_) => {}
            }
        }

        let mut last_error = None;
        for target in readable {
            match self.shard.read_newest(target, key, start, count).await {
                Ok(raw) => return decode(&raw, include_deleted).map(Some),
                Err(e) => {
                    debug!(%target, key, error = %e, "read failed, trying next replica");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| EngineError::Unavailable {
            key: key.to_string(),
        }))
    }

    /// Number of entries in the longest replica of `key`.
    ///
    /// Returns `None` when no replica holds it, `Some(0)` for a timeline
    /// emptied with [`store`](Self::store).
    pub async fn size(&self, key: &str) -> Result<Option<u64>, EngineError> {
        let lens = self.replica_lens(key).await?;
        Ok(longest(&lens).map(|(_, len)| len.entries))
    }

    /// Rebuild every reachable replica of `key` from the longest one.
    ///
    /// Returns the outcome for each replica that was rebuilt or already up
    /// to date. Fails only when no replica can be measured.
    pub async fn rebuild(
        &self,
        key: &str,
    ) -> Result<Vec<(ShardTarget, RebuildOutcome)>, EngineError> {
        let lens = self.replica_lens(key).await?;
        let Some((source, _)) = longest(&lens) else {
            return Ok(Vec::new());
        };

        let mut outcomes = Vec::new();
        for (target, len) in &lens {
            if *target == source || len.is_err() {
                continue;
            }
            match self.rebuilder.rebuild(key, &source, target).await {
                Ok(outcome) => outcomes.push((target.clone(), outcome)),
                Err(e) => warn!(%target, key, error = %e, "replica rebuild failed"),
            }
        }
        info!(key, %source, rebuilt = outcomes.len(), "rebuild finished");
        Ok(outcomes)
    }

    /// Run every parked job once more.
    pub async fn retry_errors(&self) -> DispatchReport {
        self.scheduler.retry_errors().await
    }

    /// Number of parked jobs.
    pub fn error_queue_len(&self) -> usize {
        self.scheduler.error_queue_len()
    }

    /// Close every pooled connection.
    pub async fn shutdown(&self) {
        self.executor().pool().shutdown_all().await;
    }

    /// Group `keys` by the shard targets holding them and dispatch one job
    /// per target.
    async fn fan_out(&self, op: JobOp, keys: Vec<String>) -> DispatchReport {
        let mut by_target: BTreeMap<ShardTarget, Vec<String>> = BTreeMap::new();
        for key in keys {
            for target in self.resolver.resolve(&key) {
                by_target.entry(target).or_default().push(key.clone());
            }
        }
        let jobs = by_target
            .into_iter()
            .map(|(target, keys)| Job::new(op.clone(), target, keys))
            .collect();
        self.scheduler.dispatch(jobs).await
    }

    /// Length of `key` on each replica, in resolver order.
    ///
    /// Fails with [`EngineError::Unavailable`] when no replica answers.
    async fn replica_lens(&self, key: &str) -> Result<Vec<ReplicaLen>, EngineError> {
        let mut lens = Vec::new();
        for target in self.resolver.resolve(key) {
            let len = self.shard.measure(&target, key).await;
            if let Err(e) = &len {
                debug!(%target, key, error = %e, "replica unreachable");
            }
            lens.push((target, len));
        }
        if lens.iter().all(|(_, len)| len.is_err()) {
            return Err(EngineError::Unavailable {
                key: key.to_string(),
            });
        }
        Ok(lens)
    }
}

/// The first replica holding the timeline with the most entries.
fn longest(lens: &[ReplicaLen]) -> Option<(ShardTarget, TimelineLen)> {
    let mut best: Option<(&ShardTarget, TimelineLen)> = None;
    for (target, len) in lens {
        if let Ok(len) = len
            && len.exists()
            && best.is_none_or(|(_, b)| len.entries > b.entries)
        {
            best = Some((target, *len));
        }
    }
    best.map(|(target, len)| (target.clone(), len))
}

fn is_behind(len: &TimelineLen, longest: &TimelineLen) -> bool {
    len.entries < longest.entries || !len.exists()
}

fn keys<I: Display>(prefix: &str, ids: &[I]) -> Vec<String> {
    ids.iter().map(|id| format!("{prefix}{id}")).collect()
}

fn decode(raw: &[Bytes], include_deleted: bool) -> Result<Vec<TimelineEntry>, EngineError> {
    let mut entries = Vec::with_capacity(raw.len());
    for value in raw {
        match StoredValue::decode(value)? {
            StoredValue::Sentinel => {}
            StoredValue::Entry(entry) if entry.deleted && !include_deleted => {}
            StoredValue::Entry(entry) => entries.push(entry),
        }
    }
    Ok(entries)
}
