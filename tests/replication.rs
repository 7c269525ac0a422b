//! Storage placement: put/get/owners, rebalance on join, hand-off on leave

mod common;

use common::Cluster;
use ringkv::common::Config;
use ringkv::node::NodePhase;
use std::collections::BTreeSet;

fn keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("key-{}", i)).collect()
}

#[tokio::test]
async fn test_put_then_get_from_any_node() {
    let cluster = Cluster::start(Config::test_config(), &[10, 50, 90, 120]).await;

    cluster.node(10).put("apple", "red").await.unwrap();
    for node in &cluster.nodes {
        assert_eq!(node.get("apple").await.unwrap().as_deref(), Some("red"));
        assert_eq!(node.get("pear").await.unwrap(), None);
    }

    // overwrite keeps a single value
    cluster.node(90).put("apple", "green").await.unwrap();
    assert_eq!(
        cluster.node(50).get("apple").await.unwrap().as_deref(),
        Some("green")
    );

    cluster.shutdown();
}

#[tokio::test]
async fn test_every_key_has_three_distinct_owners() {
    let cluster = Cluster::start(Config::test_config(), &[10, 50, 90, 120]).await;
    let a = cluster.node(10);

    for key in keys(20) {
        let replicas = a.put(&key, "v").await.unwrap();
        assert_eq!(replicas.len(), 3);

        let owners = cluster.node(120).find_owners(&key).await.unwrap();
        let names: BTreeSet<_> = owners.iter().map(|o| o.name.clone()).collect();
        assert_eq!(names.len(), 3, "owners of {}", key);
        assert_eq!(cluster.holders(&key), 3, "holders of {}", key);

        // the owner is the first member at or after the key's hash
        let hash = a.hash(&key);
        let expected = [10, 50, 90, 120]
            .into_iter()
            .find(|id| *id >= hash)
            .unwrap_or(10);
        assert_eq!(owners[0].id, expected);
    }

    cluster.shutdown();
}

#[tokio::test]
async fn test_two_node_ring_keeps_two_copies() {
    let cluster = Cluster::start(Config::test_config(), &[10, 50]).await;
    cluster.node(50).put("k", "v").await.unwrap();

    assert_eq!(cluster.node(10).find_owners("k").await.unwrap().len(), 2);
    assert_eq!(cluster.holders("k"), 2);
    cluster.shutdown();
}

#[tokio::test]
async fn test_join_rebalances_existing_keys() {
    let mut cluster = Cluster::start(Config::test_config(), &[10, 50, 90]).await;
    for key in keys(30) {
        cluster.node(10).put(&key, &key).await.unwrap();
    }

    cluster.join(120).await;

    for key in keys(30) {
        assert_eq!(cluster.holders(&key), 3, "holders of {}", key);
        let value = cluster.node(120).get(&key).await.unwrap();
        assert_eq!(value.as_deref(), Some(key.as_str()));
    }
    cluster.shutdown();
}

#[tokio::test]
async fn test_leave_preserves_keys_without_extra_copies() {
    let mut cluster = Cluster::start(Config::test_config(), &[10, 50, 90, 120]).await;
    for key in keys(40) {
        cluster.node(50).put(&key, &key).await.unwrap();
    }

    let leaving = cluster.remove(90);
    leaving.leave().await.unwrap();
    assert_eq!(leaving.phase(), NodePhase::Leaving);
    assert!(leaving.storage_snapshot().is_empty());
    assert!(leaving.heartbeat_peers().is_empty());

    assert_eq!(cluster.ring_ids().await, vec![10, 50, 120]);
    for node in &cluster.nodes {
        let ids: Vec<_> = node.membership().keys().copied().collect();
        assert_eq!(ids, vec![10, 50, 120]);
        assert!(node.heartbeat_peers().iter().all(|p| p.id != 90));
    }

    for key in keys(40) {
        assert_eq!(cluster.holders(&key), 3, "holders of {}", key);
        let value = cluster.node(10).get(&key).await.unwrap();
        assert_eq!(value.as_deref(), Some(key.as_str()));
    }
    cluster.shutdown();
}

#[tokio::test]
async fn test_last_node_leaving_clears_itself() {
    let cluster = Cluster::start(Config::test_config(), &[10]).await;
    let a = cluster.node(10);
    a.put("k", "v").await.unwrap();

    a.leave().await.unwrap();
    assert!(a.storage_snapshot().is_empty());
}
