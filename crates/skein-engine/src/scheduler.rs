//! Job scheduler: runs per-shard write jobs concurrently with retries, and
//! parks jobs that keep failing in an error queue for a later retry.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use skein_types::{JobConfig, ShardTarget};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::shard::TimelineShard;

/// The write a job applies to each of its keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOp {
    /// Append the value to timelines that exist.
    Append(Bytes),
    /// Remove every occurrence of the value.
    Remove(Bytes),
    /// Replace each timeline with these values, oldest first.
    Replace(Vec<Bytes>),
    /// Delete each timeline.
    Delete,
}

impl fmt::Display for JobOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append(_) => f.write_str("append"),
            Self::Remove(_) => f.write_str("remove"),
            Self::Replace(_) => f.write_str("replace"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// One write against one shard target, covering any number of keys.
///
/// Keys are taken off the front as they complete, so a retried job only
/// repeats the keys that have not succeeded yet.
#[derive(Debug, Clone)]
pub struct Job {
    op: JobOp,
    target: ShardTarget,
    pending: VecDeque<String>,
}

impl Job {
    /// Create a job applying `op` to `keys` on `target`.
    pub fn new(op: JobOp, target: ShardTarget, keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            op,
            target,
            pending: keys.into_iter().collect(),
        }
    }

    /// The write this job applies.
    pub fn op(&self) -> &JobOp {
        &self.op
    }

    /// The shard this job writes to.
    pub fn target(&self) -> &ShardTarget {
        &self.target
    }

    /// Keys not yet written.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    async fn run(&mut self, shard: &TimelineShard) -> Result<(), EngineError> {
        while let Some(key) = self.pending.front() {
            match &self.op {
                JobOp::Append(value) => {
                    shard.append(&self.target, key, value).await?;
                }
                JobOp::Remove(value) => {
                    shard.remove(&self.target, key, value).await?;
                }
                JobOp::Replace(values) => shard.replace(&self.target, key, values).await?,
                JobOp::Delete => {
                    shard.delete(&self.target, key).await?;
                }
            }
            self.pending.pop_front();
        }
        Ok(())
    }
}

/// Outcome of dispatching a batch of jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Jobs that completed.
    pub succeeded: usize,
    /// Jobs that ran out of attempts and were parked in the error queue.
    pub failed: usize,
}

impl DispatchReport {
    /// Whether every job completed.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Runs jobs with bounded concurrency and retries.
pub struct JobScheduler {
    shard: TimelineShard,
    /// Semaphore limiting concurrently running jobs.
    concurrency: Arc<Semaphore>,
    max_retries: u32,
    retry_backoff: Duration,
    /// Jobs that exhausted their attempts, oldest first.
    error_queue: Mutex<VecDeque<Job>>,
    /// Total jobs that completed since the scheduler was created.
    completed: AtomicU64,
    /// Total jobs parked since the scheduler was created.
    parked: AtomicU64,
}

impl JobScheduler {
    /// Create a scheduler running jobs through `shard`.
    pub fn new(config: &JobConfig, shard: TimelineShard) -> Self {
        Self {
            shard,
            concurrency: Arc::new(Semaphore::new(config.concurrency.max(1))),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            error_queue: Mutex::new(VecDeque::new()),
            completed: AtomicU64::new(0),
            parked: AtomicU64::new(0),
        }
    }

    /// Run `jobs` concurrently, retrying each up to `max_retries` times.
    ///
    /// Jobs still failing afterwards are parked in the error queue.
    pub async fn dispatch(&self, jobs: Vec<Job>) -> DispatchReport {
        if jobs.is_empty() {
            return DispatchReport::default();
        }
        debug!(jobs = jobs.len(), "dispatching jobs");
        self.run_all(jobs, self.max_retries).await
    }

    /// Run every parked job once more.
    ///
    /// Jobs that succeed leave the queue; jobs that fail are parked again.
    pub async fn retry_errors(&self) -> DispatchReport {
        let jobs: Vec<Job> = self
            .error_queue
            .lock()
            .expect("lock poisoned")
            .drain(..)
            .collect();
        if jobs.is_empty() {
            return DispatchReport::default();
        }
        info!(jobs = jobs.len(), "retrying parked jobs");
        self.run_all(jobs, 0).await
    }

    /// Number of parked jobs.
    pub fn error_queue_len(&self) -> usize {
        self.error_queue.lock().expect("lock poisoned").len()
    }

    /// Copies of the parked jobs, oldest first.
    pub fn parked_jobs(&self) -> Vec<Job> {
        self.error_queue
            .lock()
            .expect("lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Jobs completed and parked since creation.
    pub fn totals(&self) -> (u64, u64) {
        (
            self.completed.load(Ordering::Relaxed),
            self.parked.load(Ordering::Relaxed),
        )
    }

    async fn run_all(&self, jobs: Vec<Job>, retries: u32) -> DispatchReport {
        let mut tasks = JoinSet::new();
        for job in jobs {
            let Ok(permit) = self.concurrency.clone().acquire_owned().await else {
                // The semaphore is never closed.
                break;
            };
            let shard = self.shard.clone();
            let backoff = self.retry_backoff;
            tasks.spawn(async move {
                let _permit = permit;
                run_with_retries(job, &shard, retries, backoff).await
            });
        }

        let mut report = DispatchReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {
                    report.succeeded += 1;
                    self.completed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(job)) => {
                    report.failed += 1;
                    self.parked.fetch_add(1, Ordering::Relaxed);
                    self.error_queue.lock().expect("lock poisoned").push_back(job);
                }
                Err(e) => {
                    report.failed += 1;
                    error!(error = %e, "job task panicked");
                }
            }
        }
        if !report.is_complete() {
            warn!(
                succeeded = report.succeeded,
                failed = report.failed,
                "some jobs were parked"
            );
        }
        report
    }
}

/// Run `job` until it succeeds or has been retried `retries` times.
/// Returns the unfinished job on failure.
async fn run_with_retries(
    mut job: Job,
    shard: &TimelineShard,
    retries: u32,
    backoff: Duration,
) -> Result<(), Job> {
    let mut attempt = 0;
    loop {
        match job.run(shard).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < retries => {
                attempt += 1;
                debug!(op = %job.op, target = %job.target, attempt, error = %e, "job failed, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                warn!(
                    op = %job.op,
                    target = %job.target,
                    pending = job.pending.len(),
                    error = %e,
                    "job failed, parking"
                );
                return Err(job);
            }
        }
    }
}
