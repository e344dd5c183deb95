// Copyright (c) 2024 Botho Foundation

//! End-to-end network lifecycle against the fake process launcher.

use bth_local_network::{
    test_utils::{FakeBehavior, FakeLauncher},
    topology, Error, Network, NetworkConfig, NodeStatus, QuorumSet, ServiceKind, Topology,
};
use serde_json::{json, Value};
use std::{fs, sync::Arc, thread, time::Duration};
use tempfile::TempDir;

fn network(dir: &TempDir) -> (Network, Arc<FakeLauncher>) {
    let mut config = NetworkConfig::with_work_dir(dir.path().join("work"));
    config.cli_port = 0;
    config.poll_interval_ms = 5;
    let launcher = Arc::new(FakeLauncher::new());
    (Network::new(config, launcher.clone()).unwrap(), launcher)
}

fn network_json(network: &Network, name: &str) -> Value {
    let path = network.node(name).unwrap().network_config_file();
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn abc_writes_network_config_files() {
    let dir = tempfile::tempdir().unwrap();
    let (mut network, launcher) = network(&dir);
    network.default_entry_point("a-b-c", None).unwrap();

    assert_eq!(launcher.count_spawns("consensus-service"), 3);
    assert_eq!(launcher.count_spawns("ledger-distribution"), 3);
    assert_eq!(launcher.count_spawns("mc-admin-http-gateway"), 3);

    let a = network_json(&network, "a");
    assert_eq!(
        a["quorum_set"],
        json!({
            "threshold": 2,
            "members": [
                { "type": "Node", "args": "localhost:3301" },
                { "type": "Node", "args": "localhost:3302" },
            ]
        })
    );
    let b_uri = network.node("b").unwrap().peer_uri(true).unwrap();
    let c_uri = network.node("c").unwrap().peer_uri(true).unwrap();
    assert_eq!(a["broadcast_peers"], json!([b_uri]));
    assert_eq!(a["known_peers"], json!([c_uri]));

    let b = network_json(&network, "b");
    assert_eq!(b["broadcast_peers"].as_array().unwrap().len(), 2);
    assert_eq!(b["known_peers"], json!([]));

    for node in network.nodes().iter() {
        assert!(node.tokens_config_file().exists());
        assert!(matches!(node.status(), NodeStatus::Running { .. }));
    }
    network.stop().unwrap();
}

#[test]
fn dense5_nodes_know_every_other_node() {
    let dir = tempfile::tempdir().unwrap();
    let (mut network, _) = network(&dir);
    network.default_entry_point("dense5", None).unwrap();

    assert_eq!(network.nodes().len(), 5);
    for node in network.nodes().iter() {
        let config = network_json(&network, node.name());
        assert_eq!(config["broadcast_peers"].as_array().unwrap().len(), 4);
        assert_eq!(config["known_peers"], json!([]));
        assert_eq!(config["quorum_set"]["threshold"], 3);
        assert_eq!(config["quorum_set"]["members"].as_array().unwrap().len(), 4);
    }
    network.stop().unwrap();
}

#[test]
fn ring5b_only_broadcasts_to_successor() {
    let dir = tempfile::tempdir().unwrap();
    let (mut network, _) = network(&dir);
    network.default_entry_point("ring5b", None).unwrap();

    let node = |name| network.node(name).unwrap();
    let (node1, node2, node5) = (node("1"), node("2"), node("5"));

    let config = network_json(&network, "1");
    assert_eq!(
        config["broadcast_peers"],
        json!([node5.peer_uri(false).unwrap(), node2.peer_uri(true).unwrap()])
    );
    assert_eq!(
        config["known_peers"],
        json!([node("3").peer_uri(true).unwrap(), node("4").peer_uri(true).unwrap()])
    );
    assert_eq!(
        config["quorum_set"]["members"],
        json!([{ "type": "Node", "args": format!("localhost:{}", node2.ports().peer) }])
    );
    assert_eq!(node1.ports().peer, 3300);
    network.stop().unwrap();
}

#[test]
fn restart_does_not_duplicate_processes() {
    let dir = tempfile::tempdir().unwrap();
    let (mut network, launcher) = network(&dir);
    network.default_entry_point("a-b-c", None).unwrap();
    network.start().unwrap();

    // The first run's services were all terminated before restarting.
    assert_eq!(launcher.terminated(), 9);
    assert_eq!(launcher.count_spawns("consensus-service"), 6);
    for node in network.nodes().iter() {
        assert!(matches!(node.status(), NodeStatus::Running { .. }));
    }

    network.stop().unwrap();
    for node in network.nodes().iter() {
        assert_eq!(node.status(), NodeStatus::Stopped);
    }
    // Stopping twice is harmless.
    network.stop().unwrap();
}

#[test]
fn topology_is_frozen_after_start() {
    let dir = tempfile::tempdir().unwrap();
    let (mut network, _) = network(&dir);
    network.default_entry_point("a-b-c", None).unwrap();

    assert!(matches!(
        network.add_node("d", vec![], QuorumSet::of_nodes(1, &["a"])),
        Err(Error::TopologyFrozen(name)) if name == "d"
    ));
    network.stop().unwrap();
}

#[test]
fn consensus_exit_during_startup_skips_auxiliary_services() {
    let dir = tempfile::tempdir().unwrap();
    let (mut network, launcher) = network(&dir);
    launcher.set_behavior("consensus-service", FakeBehavior::ExitImmediately(Some(2)));
    network.default_entry_point("a-b-c", None).unwrap();

    assert_eq!(launcher.count_spawns("consensus-service"), 3);
    assert_eq!(launcher.count_spawns("ledger-distribution"), 0);
    assert_eq!(launcher.count_spawns("mc-admin-http-gateway"), 0);
    for node in network.nodes().iter() {
        assert_eq!(node.status(), NodeStatus::Exited);
    }
    assert!(network.cli().is_some());
    network.stop().unwrap();
}

#[test]
fn wait_reports_first_crash() {
    let dir = tempfile::tempdir().unwrap();
    let (mut network, launcher) = network(&dir);
    network.default_entry_point("a-b-c", None).unwrap();

    let watcher = network.crash_watcher();
    let handle = thread::spawn(move || watcher.wait());
    thread::sleep(Duration::from_millis(20));
    assert!(!handle.is_finished());

    launcher.crash_all(7);
    let report = handle.join().unwrap();
    assert_eq!(report.node, "a");
    assert_eq!(report.service, ServiceKind::Consensus);
    assert_eq!(report.exit_code, Some(7));
    assert_eq!(report.to_string(), "Node a consensus service died with exit code Some(7)");

    network.stop().unwrap();
}

#[test]
fn custom_topology_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("topology.toml");
    fs::write(
        &path,
        r#"
[[nodes]]
name = "left"
peers = ["right"]
quorum_set = { threshold = 1, members = [{ threshold = 1, members = ["right"] }] }

[[nodes]]
name = "right"
peers = [{ name = "left", broadcast_consensus_msgs = false }]
quorum_set = { threshold = 1, members = ["left"] }
"#,
    )
    .unwrap();

    let (mut network, _) = network(&dir);
    network
        .entry_point(topology::load_topology(&path).unwrap(), Some(5))
        .unwrap();

    let left = network_json(&network, "left");
    assert_eq!(
        left["quorum_set"],
        json!({
            "threshold": 1,
            "members": [{
                "type": "InnerSet",
                "args": {
                    "threshold": 1,
                    "members": [{ "type": "Node", "args": "localhost:3301" }]
                }
            }]
        })
    );
    let right = network_json(&network, "right");
    let left_uri = network.node("left").unwrap().peer_uri(false).unwrap();
    assert!(left_uri.ends_with("&broadcast-consensus-msgs=0"));
    assert_eq!(right["broadcast_peers"], json!([left_uri]));
    assert_eq!(right["known_peers"], json!([]));
    assert!(network.nodes().iter().all(|node| node.block_version() == 5));
    network.stop().unwrap();
}

#[test]
fn every_preset_starts() {
    for topology in Topology::ALL {
        let dir = tempfile::tempdir().unwrap();
        let (mut network, launcher) = network(&dir);
        network.default_entry_point(topology.name(), None).unwrap();
        assert_eq!(
            launcher.count_spawns("consensus-service"),
            topology.nodes().len(),
            "{topology}"
        );
        network.stop().unwrap();
    }
}
