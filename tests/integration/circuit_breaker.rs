//! Integration test: host failure, circuit opening and recovery.

use std::time::Duration;

use skein_integration_tests::{ClusterOptions, IntegrationCluster, test_entry};
use skein_types::{JobConfig, PoolConfig};

fn one_group(host_error_limit: u32) -> IntegrationCluster {
    IntegrationCluster::with_options(ClusterOptions {
        groups: 1,
        replicas: 2,
        pool: PoolConfig {
            host_error_limit,
            auto_disable_secs: 60,
            ..PoolConfig::default()
        },
        jobs: JobConfig {
            max_retries: 2,
            retry_backoff_ms: 10,
            concurrency: 4,
        },
        ..ClusterOptions::default()
    })
}

/// Failures past the limit open the circuit; disabled calls fail fast and
/// are not counted; the host comes back once the window elapses.
#[tokio::test(start_paused = true)]
async fn test_dead_host_is_disabled_then_recovers() {
    let c = one_group(3);
    c.service().store("tl:1", &[test_entry(0)]).await;
    c.kill_host("g0-r1").await;

    // Three attempts, three recorded failures: still under the limit.
    let report = c.service().append(&test_entry(1), "tl:", &[1]).await;
    assert_eq!((report.succeeded, report.failed), (1, 1));
    let health = c.executor().health().host_health("g0-r1");
    assert_eq!(health.errors, 3);
    assert_eq!(health.disabled_until, None);

    // The fourth failure opens the circuit; the two retries fail fast.
    c.service().append(&test_entry(2), "tl:", &[1]).await;
    let health = c.executor().health().host_health("g0-r1");
    assert_eq!(health.errors, 4);
    assert!(health.disabled_until.is_some());
    let stats = c.executor().stats().snapshot();
    assert_eq!(stats.acquire_failures, 4);
    assert_eq!(stats.black_holes, 2);

    // Reviving the host does not help until the window elapses.
    c.revive_host("g0-r1");
    assert_eq!(c.service().retry_errors().await.failed, 2);
    assert_eq!(c.service().error_queue_len(), 2);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(c.service().retry_errors().await.is_complete());
    // The two replayed appends may land in either order.
    let mut replayed = c.raw("g0-r1", "tl:1");
    let mut reference = c.raw("g0-r0", "tl:1");
    replayed.sort();
    reference.sort();
    assert_eq!(replayed, reference);
    assert_eq!(c.executor().health().host_health("g0-r1").errors, 0);
}

/// Reads keep working from the surviving replica while a host is disabled.
#[tokio::test(start_paused = true)]
async fn test_reads_route_around_disabled_host() {
    let c = one_group(0);
    c.service().store("tl:1", &[test_entry(0), test_entry(1)]).await;
    c.kill_host("g0-r0").await;

    for _ in 0..5 {
        assert_eq!(
            c.read_payloads("tl:1").await,
            Some(vec![test_entry(1).payload, test_entry(0).payload])
        );
    }
    // Only the first call reached the dead host.
    let stats = c.executor().stats().snapshot();
    assert_eq!(stats.acquire_failures, 1);
    assert_eq!(stats.black_holes, 4);
}

/// With every replica down a read reports the timeline unavailable.
#[tokio::test(start_paused = true)]
async fn test_all_replicas_down() {
    let c = one_group(20);
    c.service().store("tl:1", &[test_entry(0)]).await;
    c.kill_host("g0-r0").await;
    c.kill_host("g0-r1").await;

    let err = c.service().get("tl:1", 0, 10, false).await.unwrap_err();
    assert!(err.to_string().contains("tl:1"), "{err}");
}
