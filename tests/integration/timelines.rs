//! Integration test: timeline reads and fan-out writes across replica groups.

use std::collections::HashSet;

use skein_integration_tests::{IntegrationCluster, test_entry};

/// 30 timelines over 3 groups: every append lands on every replica of every
/// existing timeline, and reads come back newest first.
#[tokio::test]
async fn test_fan_out_append_and_read() {
    let c = IntegrationCluster::new();
    let ids: Vec<u32> = (0..30).collect();
    for id in &ids {
        assert!(c.service().store(&format!("tl:{id}"), &[]).await.is_complete());
    }

    for n in 0..5 {
        let report = c.service().append(&test_entry(n), "tl:", &ids).await;
        // One job per shard target; all six hosts hold some of the keys.
        assert!(report.is_complete());
        assert!(report.succeeded <= 6);
    }

    let expected: Vec<_> = (0..5).rev().map(|n| test_entry(n).payload).collect();
    for id in &ids {
        let key = format!("tl:{id}");
        assert_eq!(c.read_payloads(&key).await, Some(expected.clone()), "{key}");

        let replicas = c.replicas(&key);
        assert_eq!(replicas.len(), 2);
        assert_eq!(c.raw(&replicas[0].host, &key), c.raw(&replicas[1].host, &key));
    }
}

/// Keys hash onto more than one group, and each key lives only in its own.
#[tokio::test]
async fn test_keys_are_placed_by_group() {
    let c = IntegrationCluster::new();
    let mut used_hosts = HashSet::new();
    for id in 0..60 {
        let key = format!("user:{id}");
        c.service().store(&key, &[test_entry(id)]).await;

        let replicas: HashSet<String> = c.replicas(&key).into_iter().map(|t| t.host).collect();
        for host in c.hosts() {
            let holds = !c.raw(&host, &key).is_empty();
            assert_eq!(holds, replicas.contains(&host), "{key} on {host}");
        }
        used_hosts.extend(replicas);
    }
    assert_eq!(used_hosts.len(), 6);
}

/// Appends never create timelines; `store` with no entries does.
#[tokio::test]
async fn test_append_respects_existence() {
    let c = IntegrationCluster::new();
    c.service().store("feed:1", &[]).await;

    c.service().append(&test_entry(1), "feed:", &[1, 2]).await;
    assert_eq!(c.read_payloads("feed:1").await, Some(vec![test_entry(1).payload]));
    assert_eq!(c.read_payloads("feed:2").await, None);
    assert_eq!(c.service().size("feed:2").await.unwrap(), None);
}

/// Windowed reads, removals and deletion.
#[tokio::test]
async fn test_window_remove_delete() {
    let c = IntegrationCluster::new();
    let entries: Vec<_> = (0..10).map(test_entry).collect();
    c.service().store("tl:w", &entries).await;

    let window = c.service().get("tl:w", 2, 3, false).await.unwrap().unwrap();
    assert_eq!(window, vec![entries[7].clone(), entries[6].clone(), entries[5].clone()]);

    c.service().remove(&entries[9], "tl:", &["w"]).await;
    let newest = c.service().get("tl:w", 0, 1, false).await.unwrap().unwrap();
    assert_eq!(newest, vec![entries[8].clone()]);
    assert_eq!(c.service().size("tl:w").await.unwrap(), Some(9));

    c.service().delete_timeline("tl:w").await;
    assert_eq!(c.read_payloads("tl:w").await, None);
}

/// Every acquired connection is released exactly once across a mixed workload.
#[tokio::test]
async fn test_release_accounting_over_workload() {
    let c = IntegrationCluster::new();
    let ids: Vec<u32> = (0..20).collect();
    for id in &ids {
        c.service().store(&format!("tl:{id}"), &[test_entry(*id)]).await;
    }
    c.service().append(&test_entry(100), "tl:", &ids).await;
    for id in &ids {
        c.read_payloads(&format!("tl:{id}")).await;
    }

    let stats = c.executor().stats().snapshot();
    assert!(stats.acquired > 0);
    assert_eq!(stats.acquired, stats.releases);
    assert_eq!(stats.successes, stats.acquired);
    c.service().shutdown().await;
    assert!(c.executor().pool().is_empty());
}
