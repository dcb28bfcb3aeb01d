//! Shared test harness for Skein integration tests.
//!
//! Provides [`IntegrationCluster`] — an in-memory cluster of list-store
//! hosts arranged in replica groups, with the full storage tier on top:
//! connection pool, health tracking, executor, rebuilder, job scheduler and
//! timeline service. Hosts can be killed and revived, and every session can
//! optionally inject seeded faults.

use std::sync::Arc;

use bytes::Bytes;
use skein_engine::{ReplicaRing, ShardResolver, TimelineService};
use skein_pool::OperationExecutor;
use skein_store::{Connector, FaultyConnector, ListStore, MemoryBackend};
use skein_types::{JobConfig, PoolConfig, ShardTarget, TimelineEntry, sentinel};

/// Options for building an [`IntegrationCluster`].
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Number of replica groups.
    pub groups: usize,
    /// Hosts per replica group.
    pub replicas: usize,
    /// Pool and circuit breaker settings.
    pub pool: PoolConfig,
    /// Job scheduler settings.
    pub jobs: JobConfig,
    /// Fraction of backend calls that fail, `0.0` for none.
    pub failure_rate: f64,
    /// Seed for fault injection.
    pub seed: u64,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            groups: 3,
            replicas: 2,
            pool: PoolConfig::default(),
            jobs: JobConfig {
                retry_backoff_ms: 5,
                ..JobConfig::default()
            },
            failure_rate: 0.0,
            seed: 1,
        }
    }
}

/// An in-memory replicated cluster driven through [`TimelineService`].
pub struct IntegrationCluster {
    backend: Arc<MemoryBackend>,
    executor: Arc<OperationExecutor>,
    ring: Arc<ReplicaRing>,
    service: TimelineService,
}

impl IntegrationCluster {
    /// A cluster with default options: three groups of two replicas.
    pub fn new() -> Self {
        Self::with_options(ClusterOptions::default())
    }

    /// A cluster built from `options`.
    ///
    /// Host `g{group}-r{replica}` holds shard `timeline_{group}`.
    pub fn with_options(options: ClusterOptions) -> Self {
        let groups = (0..options.groups)
            .map(|g| {
                (0..options.replicas)
                    .map(|r| ShardTarget::new(format!("g{g}-r{r}"), format!("timeline_{g:03}")))
                    .collect()
            })
            .collect();
        let ring = Arc::new(ReplicaRing::new(groups).expect("valid layout"));

        let backend = Arc::new(MemoryBackend::new());
        let connector: Arc<dyn Connector> = if options.failure_rate > 0.0 {
            Arc::new(
                FaultyConnector::new(backend.clone())
                    .failure_rate(options.failure_rate)
                    .seed(options.seed),
            )
        } else {
            backend.clone()
        };
        let executor = OperationExecutor::from_config(&options.pool, connector);
        let service = TimelineService::new(ring.clone(), executor.clone(), &options.jobs);

        Self {
            backend,
            executor,
            ring,
            service,
        }
    }

    /// The timeline service.
    pub fn service(&self) -> &TimelineService {
        &self.service
    }

    /// The executor every backend call runs through.
    pub fn executor(&self) -> &Arc<OperationExecutor> {
        &self.executor
    }

    /// The replica set of `key`, primary first.
    pub fn replicas(&self, key: &str) -> Vec<ShardTarget> {
        self.ring.resolve(key)
    }

    /// Every host in the cluster.
    pub fn hosts(&self) -> Vec<String> {
        self.ring
            .groups()
            .iter()
            .flatten()
            .map(|t| t.host.clone())
            .collect()
    }

    /// Make `host` unreachable: new sessions are refused and its pooled
    /// connection is dropped.
    pub async fn kill_host(&self, host: &str) {
        self.backend.set_down(host, true);
        if let Some(conn) = self.executor.pool().pooled(host) {
            self.executor.pool().discard(host, &conn).await;
        }
    }

    /// Make `host` reachable again. Its data is untouched.
    pub fn revive_host(&self, host: &str) {
        self.backend.set_down(host, false);
    }

    /// Create `key` as an empty timeline on every replica, bypassing the
    /// service (and any fault injection).
    pub async fn seed_timeline(&self, key: &str) {
        for target in self.replicas(key) {
            let store = self.backend.host(&target.host);
            store.delete(key).await.expect("memory store");
            store.push_back(key, &[sentinel()]).await.expect("memory store");
        }
    }

    /// Drop `key` from `host` directly, as if the replica lost it.
    pub async fn wipe(&self, host: &str, key: &str) {
        self.backend
            .host(host)
            .delete(key)
            .await
            .expect("memory store");
    }

    /// Remove the `n` oldest values of `key` on `host` directly.
    pub async fn truncate_oldest(&self, host: &str, key: &str, n: usize) {
        let store = self.backend.host(host);
        for value in store.snapshot(key).into_iter().take(n) {
            store.remove(key, &value).await.expect("memory store");
        }
    }

    /// The raw stored list of `key` on `host`, oldest first.
    pub fn raw(&self, host: &str, key: &str) -> Vec<Bytes> {
        self.backend.host(host).snapshot(key)
    }

    /// Payloads currently readable from `key`, newest first.
    pub async fn read_payloads(&self, key: &str) -> Option<Vec<Bytes>> {
        self.service
            .get(key, 0, u32::MAX as u64, false)
            .await
            .expect("get")
            .map(|entries| entries.into_iter().map(|e| e.payload).collect())
    }
}

impl Default for IntegrationCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// A live entry with a deterministic payload derived from `seed`.
pub fn test_entry(seed: u32) -> TimelineEntry {
    TimelineEntry::new(Bytes::from(test_payload_seeded(16, seed)))
}

/// Generate deterministic data with a specific seed.
pub fn test_payload_seeded(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state = seed.wrapping_mul(0x9E37_79B9).wrapping_add(1);
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}
