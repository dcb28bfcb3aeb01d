//! Integration test: anti-entropy rebuild of stale replicas.

use skein_integration_tests::{ClusterOptions, IntegrationCluster, test_entry};
use skein_repair::RebuildPlan;
use skein_types::SENTINEL;

fn three_replicas() -> IntegrationCluster {
    IntegrationCluster::with_options(ClusterOptions {
        groups: 2,
        replicas: 3,
        ..ClusterOptions::default()
    })
}

/// A replica that lost a timeline is fully rebuilt by the next read.
#[tokio::test]
async fn test_read_heals_wiped_replica() {
    let c = three_replicas();
    let entries: Vec<_> = (0..8).map(test_entry).collect();
    c.service().store("tl:a", &entries).await;

    let primary = c.replicas("tl:a")[0].host.clone();
    c.wipe(&primary, "tl:a").await;

    let expected: Vec<_> = entries.iter().rev().map(|e| e.payload.clone()).collect();
    assert_eq!(c.read_payloads("tl:a").await, Some(expected));
    let healed = c.raw(&primary, "tl:a");
    assert_eq!(healed.len(), 8);
    assert!(!healed.iter().any(|v| v.as_ref() == SENTINEL));
}

/// A replica missing its oldest history gets just the missing entries.
#[tokio::test]
async fn test_explicit_rebuild_of_many_timelines() {
    let c = three_replicas();
    let keys: Vec<String> = (0..12).map(|i| format!("tl:{i}")).collect();
    for (i, key) in keys.iter().enumerate() {
        let entries: Vec<_> = (0..6).map(|n| test_entry(100 * i as u32 + n)).collect();
        c.service().store(key, &entries).await;
        let replicas = c.replicas(key);
        c.truncate_oldest(&replicas[1].host, key, 2).await;
        c.wipe(&replicas[2].host, key).await;
    }

    for key in &keys {
        let outcomes = c.service().rebuild(key).await.unwrap();
        assert_eq!(outcomes.len(), 2, "{key}");
        assert_eq!(outcomes[0].1.plan, RebuildPlan::Tail { missing: 2 });
        assert_eq!(outcomes[0].1.transferred, 2);
        assert_eq!(outcomes[1].1.plan, RebuildPlan::Full);
        assert_eq!(outcomes[1].1.transferred, 6);

        let replicas = c.replicas(key);
        let reference = c.raw(&replicas[0].host, key);
        for target in &replicas[1..] {
            assert_eq!(c.raw(&target.host, key), reference, "{key} on {target}");
        }
    }

    // A second pass has nothing to do.
    for key in &keys {
        let outcomes = c.service().rebuild(key).await.unwrap();
        assert!(outcomes.iter().all(|(_, o)| o.plan == RebuildPlan::UpToDate));
    }
}

/// An emptied timeline propagates as sentinel-only.
#[tokio::test]
async fn test_rebuild_propagates_emptied_timeline() {
    let c = three_replicas();
    c.service().store("tl:e", &[]).await;
    let replicas = c.replicas("tl:e");
    c.wipe(&replicas[2].host, "tl:e").await;

    c.service().rebuild("tl:e").await.unwrap();
    assert_eq!(c.raw(&replicas[2].host, "tl:e"), c.raw(&replicas[0].host, "tl:e"));
    assert_eq!(c.read_payloads("tl:e").await, Some(vec![]));
    assert_eq!(c.service().size("tl:e").await.unwrap(), Some(0));
}

/// Rebuilding a timeline nobody holds is a no-op.
#[tokio::test]
async fn test_rebuild_missing_timeline() {
    let c = three_replicas();
    assert!(c.service().rebuild("tl:none").await.unwrap().is_empty());
}
