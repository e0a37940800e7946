//! End-to-end cluster bootstrap scenarios
//!
//! Covers the full lifecycle of a gossip-joined cluster:
//! - sequential multi-node bootstrap with seed propagation
//! - coordinator agreement across every member
//! - HTTP probes against a running node
//! - restart-in-place and idempotent close

use std::time::Duration;

use flotilla::error::BootstrapError;
use flotilla::{BootstrapStage, Cluster, NodeHarness, NodeUri};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Wait until `node`'s membership view contains `member`, or panic after
/// two seconds.
async fn wait_for_member(node: &NodeHarness, member: &NodeUri) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let members = node.server.cluster.read().await.members.clone();
        if members.contains(member) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "node never saw {} join; members={:?}",
            member,
            members
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_zero_size_cluster_fails_without_creating_nodes() {
    init_logging();

    let result = Cluster::bootstrap(0).await;
    assert!(matches!(result, Err(BootstrapError::InvalidClusterSize(0))));
}

#[tokio::test]
async fn test_three_node_cluster_agrees_on_coordinator() {
    init_logging();

    let mut cluster = Cluster::bootstrap(3).await.unwrap();
    assert_eq!(cluster.len(), 3);

    // Node 0 self-elected; its identity is the cluster coordinator.
    let coordinator = cluster.coordinator().await.unwrap();
    let node0_uri = cluster.node(0).unwrap().server.uri().cloned().unwrap();
    assert_eq!(coordinator, node0_uri);

    for (i, node) in cluster.nodes().iter().enumerate() {
        assert_eq!(node.stage(), BootstrapStage::Started);
        assert_eq!(node.coordinator().await, Some(coordinator.clone()));

        // Every member except the first joined through a non-empty seed
        // list.
        if i > 0 {
            assert_eq!(node.config.gossip_seeds.len(), i);
        } else {
            assert!(node.config.gossip_seeds.is_empty());
        }

        // The status endpoint reports the same coordinator over HTTP.
        let status = node.client().unwrap().status().await.unwrap();
        assert_eq!(status.coordinator, Some(coordinator.clone()));
    }

    // Gossip announcements reach node 0: it eventually knows all three
    // members.
    let node1_uri = cluster.node(1).unwrap().server.uri().cloned().unwrap();
    let node2_uri = cluster.node(2).unwrap().server.uri().cloned().unwrap();
    wait_for_member(cluster.node(0).unwrap(), &node1_uri).await;
    wait_for_member(cluster.node(0).unwrap(), &node2_uri).await;

    cluster.close().await.unwrap();
}

#[tokio::test]
async fn test_second_node_inherits_first_nodes_coordinator() {
    init_logging();

    let mut node0 = NodeHarness::create_clustered().unwrap();
    let (seed0, coord0) = node0
        .run_with_transport("127.0.0.1", 0, &[], None)
        .await
        .unwrap();
    assert_eq!(Some(&coord0), node0.server.uri());

    let mut node1 = NodeHarness::create_clustered().unwrap();
    let (_seed1, coord1) = node1
        .run_with_transport("127.0.0.1", 0, &[seed0], Some(coord0.clone()))
        .await
        .unwrap();
    assert_eq!(coord1, coord0);

    let node1_uri = node1.server.uri().cloned().unwrap();
    wait_for_member(&node0, &node1_uri).await;

    node1.close().await.unwrap();
    node0.close().await.unwrap();
}

#[tokio::test]
async fn test_query_and_recalculate_probes() {
    init_logging();

    let mut node = NodeHarness::create().unwrap();
    node.start().await.unwrap();
    node.wait_started().await;
    assert_eq!(node.stage(), BootstrapStage::Started);

    let client = node.client().unwrap();

    let body = client
        .query("foo", "", "Bitmap(frame=x, rowID=1)")
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(parsed["results"].is_array());

    client.recalculate_caches().await.unwrap();

    // The node's captured output saw both requests.
    let captured = node.stdout.contents();
    assert!(captured.contains("index=foo"));
    assert!(captured.contains("recalculate caches"));

    node.close().await.unwrap();
}

#[tokio::test]
async fn test_started_signal_observable_by_early_waiter() {
    init_logging();

    let mut node = NodeHarness::create().unwrap();

    // Waiter subscribed before start() runs.
    let mut rx = node.started();
    let waiter = tokio::spawn(async move {
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    });

    node.start().await.unwrap();
    waiter.await.unwrap();

    node.close().await.unwrap();
}

#[tokio::test]
async fn test_reopen_keeps_directory_and_reallocates_addresses() {
    init_logging();

    let mut cluster = Cluster::bootstrap(1).await.unwrap();
    let node = cluster.node_mut(0).unwrap();

    let dir = node.config.data_dir.clone();
    let old_url = node.url().unwrap();
    let old_seed = node.seed_addr().unwrap();

    node.reopen().await.unwrap();

    assert_eq!(node.config.data_dir, dir);
    assert!(dir.exists());
    assert_eq!(node.stage(), BootstrapStage::Started);
    assert_ne!(node.url().unwrap(), old_url);
    assert_ne!(node.seed_addr().unwrap(), old_seed);

    // The reopened node serves queries again.
    let body = node
        .client()
        .unwrap()
        .query("foo", "", "Bitmap(frame=x, rowID=1)")
        .await
        .unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&body).is_ok());

    cluster.close().await.unwrap();
    assert!(!dir.exists());
}

#[tokio::test]
async fn test_close_is_idempotent_and_always_removes_directory() {
    init_logging();

    let mut node = NodeHarness::create().unwrap();
    node.start().await.unwrap();

    let dir = node.config.data_dir.clone();
    assert!(dir.exists());

    node.close().await.unwrap();
    assert!(!dir.exists());

    // Second close: no panic, no error.
    node.close().await.unwrap();
}
