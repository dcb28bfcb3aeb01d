//! Chaos test: seeded random backend failures under concurrent writers.
//!
//! Every session fails a fraction of its calls with client errors,
//! timeouts or backend errors. Writers append concurrently; parked jobs are
//! replayed until the queue drains. Afterwards every replica of every
//! timeline must hold every entry exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use skein_integration_tests::{ClusterOptions, IntegrationCluster, test_entry};
use skein_types::{JobConfig, PoolConfig, StoredValue};

const TIMELINES: u32 = 24;
const WRITERS: u32 = 4;
const APPENDS_PER_WRITER: u32 = 15;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flaky_backends_converge_after_retries() {
    let c = Arc::new(IntegrationCluster::with_options(ClusterOptions {
        groups: 3,
        replicas: 2,
        pool: PoolConfig {
            host_error_limit: 1_000,
            connection_error_limit: 1_000,
            ..PoolConfig::default()
        },
        jobs: JobConfig {
            max_retries: 3,
            retry_backoff_ms: 1,
            concurrency: 16,
        },
        failure_rate: 0.05,
        seed: 0xC0FFEE,
    }));
    let ids: Vec<u32> = (0..TIMELINES).collect();
    for id in &ids {
        c.seed_timeline(&format!("tl:{id}")).await;
    }

    let mut handles = Vec::new();
    for writer in 0..WRITERS {
        let c = c.clone();
        let ids = ids.clone();
        handles.push(tokio::spawn(async move {
            for n in 0..APPENDS_PER_WRITER {
                let entry = test_entry(writer * 1_000 + n);
                c.service().append(&entry, "tl:", &ids).await;
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    // Replay parked jobs until the queue drains.
    let mut rounds = 0;
    while c.service().error_queue_len() > 0 {
        rounds += 1;
        assert!(rounds <= 50, "error queue never drained");
        c.service().retry_errors().await;
    }

    let stats = c.executor().stats().snapshot();
    assert_eq!(stats.acquired, stats.releases);
    assert!(
        stats.connection_faults + stats.timeouts + stats.unclassified > 0,
        "fault injection never fired"
    );

    let expected: Vec<Bytes> = (0..WRITERS)
        .flat_map(|w| (0..APPENDS_PER_WRITER).map(move |n| test_entry(w * 1_000 + n).encode()))
        .collect();
    for id in &ids {
        let key = format!("tl:{id}");
        for target in c.replicas(&key) {
            let mut counts: HashMap<Bytes, usize> = HashMap::new();
            for value in c.raw(&target.host, &key) {
                if !StoredValue::is_sentinel(&value) {
                    *counts.entry(value).or_default() += 1;
                }
            }
            assert_eq!(counts.len(), expected.len(), "{key} on {target}");
            for value in &expected {
                assert_eq!(counts.get(value), Some(&1), "{key} on {target}");
            }
        }
    }
}
