//! Shared test utilities for skein-engine tests.

use std::sync::Arc;

use bytes::Bytes;
use skein_pool::OperationExecutor;
use skein_store::MemoryBackend;
use skein_types::{JobConfig, PoolConfig, ShardTarget, TimelineEntry};

use crate::resolver::ReplicaRing;
use crate::service::TimelineService;

pub const SHARD: &str = "timeline_000";

/// Pool limits loose enough that tests never trip the circuit by accident.
pub fn pool_config() -> PoolConfig {
    PoolConfig {
        host_error_limit: 1_000,
        connection_error_limit: 1_000,
        ..PoolConfig::default()
    }
}

pub fn job_config() -> JobConfig {
    JobConfig {
        max_retries: 2,
        retry_backoff_ms: 10,
        concurrency: 8,
    }
}

pub fn entry(payload: &'static str) -> TimelineEntry {
    TimelineEntry::new(Bytes::from_static(payload.as_bytes()))
}

/// An in-memory cluster with a single replica group spanning `hosts`.
pub struct TestCluster {
    pub backend: Arc<MemoryBackend>,
    pub executor: Arc<OperationExecutor>,
    pub service: TimelineService,
}

impl TestCluster {
    pub fn new(hosts: &[&str]) -> Self {
        let group = hosts.iter().map(|h| ShardTarget::new(*h, SHARD)).collect();
        let ring = ReplicaRing::new(vec![group]).unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let executor = OperationExecutor::from_config(&pool_config(), backend.clone());
        let service = TimelineService::new(Arc::new(ring), executor.clone(), &job_config());
        Self {
            backend,
            executor,
            service,
        }
    }

    pub fn target(host: &str) -> ShardTarget {
        ShardTarget::new(host, SHARD)
    }

    /// Refuse new sessions to `host` and drop its pooled connection, so
    /// every call against it fails.
    pub async fn take_down(&self, host: &str) {
        self.backend.set_down(host, true);
        if let Some(conn) = self.executor.pool().pooled(host) {
            self.executor.pool().discard(host, &conn).await;
        }
    }

    pub fn bring_up(&self, host: &str) {
        self.backend.set_down(host, false);
    }

    /// The raw stored list of `key` on `host`, oldest first.
    pub fn raw(&self, host: &str, key: &str) -> Vec<Bytes> {
        self.backend.host(host).snapshot(key)
    }

    /// Payloads of a `get`, newest first.
    pub async fn payloads(&self, key: &str, start: u64, count: u64) -> Option<Vec<Bytes>> {
        self.service
            .get(key, start, count, false)
            .await
            .unwrap()
            .map(|entries| entries.into_iter().map(|e| e.payload).collect())
    }
}
