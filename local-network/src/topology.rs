// Copyright (c) 2024 Botho Foundation

//! Named topology presets and topology files.

use crate::{
    error::{Error, Result},
    peer::Peer,
    quorum_set::QuorumSet,
};
use serde::Deserialize;
use std::{collections::HashSet, fmt, fs, path::Path, str::FromStr};

/// Everything needed to add one node to a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub peers: Vec<Peer>,
    pub quorum_set: QuorumSet,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, peers: Vec<Peer>, quorum_set: QuorumSet) -> Self {
        Self {
            name: name.into(),
            peers,
            quorum_set,
        }
    }
}

/// The built-in network shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Five fully connected nodes, each requiring 3 of the other 4.
    Dense5,
    /// `a <-> b <-> c`, where every node requires both others.
    ABC,
    /// Five nodes in a ring, each trusting its successor.
    Ring5,
    /// `Ring5` where consensus messages only flow towards the successor.
    Ring5B,
}

impl Topology {
    pub const ALL: [Topology; 4] = [
        Topology::Dense5,
        Topology::ABC,
        Topology::Ring5,
        Topology::Ring5B,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Topology::Dense5 => "dense5",
            Topology::ABC => "a-b-c",
            Topology::Ring5 => "ring5",
            Topology::Ring5B => "ring5b",
        }
    }

    pub fn nodes(&self) -> Vec<NodeSpec> {
        match self {
            Topology::Dense5 => dense(5, 3),
            Topology::ABC => vec![
                NodeSpec::new("a", vec![Peer::new("b")], QuorumSet::of_nodes(2, &["b", "c"])),
                NodeSpec::new(
                    "b",
                    vec![Peer::new("a"), Peer::new("c")],
                    QuorumSet::of_nodes(2, &["a", "c"]),
                ),
                NodeSpec::new("c", vec![Peer::new("b")], QuorumSet::of_nodes(2, &["a", "b"])),
            ],
            Topology::Ring5 => ring(5, true),
            Topology::Ring5B => ring(5, false),
        }
    }
}

impl FromStr for Topology {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Topology::ALL
            .into_iter()
            .find(|topology| topology.name() == s)
            .ok_or_else(|| Error::UnknownTopology(s.to_string()))
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `count` nodes named "0".., each peered with and trusting all the others.
fn dense(count: usize, threshold: u32) -> Vec<NodeSpec> {
    (0..count)
        .map(|i| {
            let others: Vec<String> = (0..count)
                .filter(|j| *j != i)
                .map(|j| j.to_string())
                .collect();
            NodeSpec::new(
                i.to_string(),
                others.iter().map(Peer::new).collect(),
                QuorumSet::of_nodes(threshold, &others),
            )
        })
        .collect()
}

/// `count` nodes named "1".."count" in a cycle. Each peers with its
/// predecessor and successor and trusts only its successor.
fn ring(count: usize, broadcast_to_predecessor: bool) -> Vec<NodeSpec> {
    (1..=count)
        .map(|i| {
            let prev = if i == 1 { count } else { i - 1 };
            let next = if i == count { 1 } else { i + 1 };
            let predecessor = Peer {
                name: prev.to_string(),
                broadcast_consensus_msgs: broadcast_to_predecessor,
            };
            NodeSpec::new(
                i.to_string(),
                vec![predecessor, Peer::new(next.to_string())],
                QuorumSet::of_nodes(1, &[next.to_string()]),
            )
        })
        .collect()
}

#[derive(Deserialize)]
struct TopologyFile {
    nodes: Vec<NodeEntry>,
}

#[derive(Deserialize)]
struct NodeEntry {
    name: String,
    #[serde(default)]
    peers: Vec<Peer>,
    quorum_set: toml::Value,
}

/// Parse a topology from TOML text.
pub fn parse_topology(contents: &str) -> Result<Vec<NodeSpec>> {
    let file: TopologyFile = toml::from_str(contents)?;
    let specs = file
        .nodes
        .into_iter()
        .map(|entry| {
            Ok(NodeSpec {
                quorum_set: QuorumSet::try_from(&entry.quorum_set)?,
                name: entry.name,
                peers: entry.peers,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    validate(&specs)?;
    Ok(specs)
}

/// Load a topology from a TOML file.
pub fn load_topology(path: &Path) -> Result<Vec<NodeSpec>> {
    parse_topology(&fs::read_to_string(path)?)
}

/// Check names are unique, thresholds are satisfiable and every referenced
/// node exists.
pub fn validate(specs: &[NodeSpec]) -> Result<()> {
    let mut names = HashSet::new();
    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            return Err(Error::DuplicateNode(spec.name.clone()));
        }
    }
    for spec in specs {
        spec.quorum_set.validate()?;
        let referenced = spec
            .peers
            .iter()
            .map(|peer| peer.name.as_str())
            .chain(spec.quorum_set.node_names());
        for name in referenced {
            if !names.contains(name) {
                return Err(Error::UnknownNode(name.to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quorum_set::QuorumSetMember;

    fn find<'a>(specs: &'a [NodeSpec], name: &str) -> &'a NodeSpec {
        specs.iter().find(|spec| spec.name == name).unwrap()
    }

    fn peer_names(spec: &NodeSpec) -> Vec<&str> {
        spec.peers.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_parse_names() {
        for topology in Topology::ALL {
            assert_eq!(topology.name().parse::<Topology>().unwrap(), topology);
            assert!(validate(&topology.nodes()).is_ok());
        }
        assert!(matches!(
            "mesh7".parse::<Topology>(),
            Err(Error::UnknownTopology(name)) if name == "mesh7"
        ));
    }

    #[test]
    fn test_dense5() {
        let specs = Topology::Dense5.nodes();
        assert_eq!(specs.len(), 5);
        for (i, spec) in specs.iter().enumerate() {
            assert_eq!(spec.name, i.to_string());
            assert_eq!(spec.peers.len(), 4);
            assert!(spec.peers.iter().all(|p| p.broadcast_consensus_msgs));
            assert!(!peer_names(spec).contains(&spec.name.as_str()));
            assert_eq!(spec.quorum_set.threshold, 3);
            assert_eq!(spec.quorum_set.node_names(), peer_names(spec));
        }
    }

    #[test]
    fn test_abc() {
        let specs = Topology::ABC.nodes();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let a = find(&specs, "a");
        assert_eq!(peer_names(a), vec!["b"]);
        assert_eq!(a.quorum_set, QuorumSet::of_nodes(2, &["b", "c"]));

        let b = find(&specs, "b");
        assert_eq!(peer_names(b), vec!["a", "c"]);
        assert_eq!(b.quorum_set, QuorumSet::of_nodes(2, &["a", "c"]));

        let c = find(&specs, "c");
        assert_eq!(peer_names(c), vec!["b"]);
        assert_eq!(c.quorum_set, QuorumSet::of_nodes(2, &["a", "b"]));
    }

    #[test]
    fn test_ring5() {
        let specs = Topology::Ring5.nodes();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["1", "2", "3", "4", "5"]);

        assert_eq!(peer_names(find(&specs, "1")), vec!["5", "2"]);
        assert_eq!(peer_names(find(&specs, "5")), vec!["4", "1"]);
        assert_eq!(find(&specs, "5").quorum_set, QuorumSet::of_nodes(1, &["1"]));
        assert_eq!(find(&specs, "3").quorum_set, QuorumSet::of_nodes(1, &["4"]));
        assert!(specs
            .iter()
            .flat_map(|s| s.peers.iter())
            .all(|p| p.broadcast_consensus_msgs));
    }

    #[test]
    fn test_ring5b_one_direction_per_edge() {
        let specs = Topology::Ring5B.nodes();
        let broadcasts = |from: &str, to: &str| {
            find(&specs, from)
                .peers
                .iter()
                .find(|p| p.name == to)
                .unwrap()
                .broadcast_consensus_msgs
        };

        for p in 1..=5 {
            let next = p % 5 + 1;
            let (p, next) = (p.to_string(), next.to_string());
            assert!(broadcasts(&p, &next));
            assert!(!broadcasts(&next, &p));
        }
        assert_eq!(find(&specs, "2").quorum_set, QuorumSet::of_nodes(1, &["3"]));
    }

    #[test]
    fn test_parse_topology_file() {
        let specs = parse_topology(
            r#"
[[nodes]]
name = "a"
peers = ["b"]
quorum_set = { threshold = 1, members = ["b"] }

[[nodes]]
name = "b"
peers = [{ name = "a", broadcast_consensus_msgs = false }]
quorum_set = { threshold = 1, members = [{ threshold = 1, members = ["a"] }] }
"#,
        )
        .unwrap();

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].peers, vec![Peer::silent("a")]);
        assert_eq!(
            specs[1].quorum_set,
            QuorumSet::new(
                1,
                vec![QuorumSetMember::InnerSet(QuorumSet::of_nodes(1, &["a"]))]
            )
        );
    }

    #[test]
    fn test_validate_rejects_bad_topologies() {
        let dup = vec![
            NodeSpec::new("a", vec![], QuorumSet::of_nodes(1, &["a"])),
            NodeSpec::new("a", vec![], QuorumSet::of_nodes(1, &["a"])),
        ];
        assert!(matches!(validate(&dup), Err(Error::DuplicateNode(n)) if n == "a"));

        let unknown_peer = vec![NodeSpec::new("a", vec![Peer::new("x")], QuorumSet::of_nodes(1, &["a"]))];
        assert!(matches!(validate(&unknown_peer), Err(Error::UnknownNode(n)) if n == "x"));

        let unknown_member = vec![NodeSpec::new("a", vec![], QuorumSet::of_nodes(1, &["y"]))];
        assert!(matches!(validate(&unknown_member), Err(Error::UnknownNode(n)) if n == "y"));

        let bad_threshold = vec![NodeSpec::new("a", vec![], QuorumSet::of_nodes(2, &["a"]))];
        assert!(matches!(validate(&bad_threshold), Err(Error::InvalidThreshold { .. })));
    }

    #[test]
    fn test_parse_topology_unsupported_member() {
        let result = parse_topology(
            r#"
[[nodes]]
name = "a"
quorum_set = { threshold = 1, members = [true] }
"#,
        );
        assert!(matches!(result, Err(Error::UnsupportedMemberType(kind)) if kind == "boolean"));
    }
}
