// Copyright (c) 2024 Botho Foundation

//! Quorum sets and their resolution into the consensus service's network
//! configuration format.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A member of a quorum set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuorumSetMember {
    /// Another node, by name.
    Node(String),
    /// A nested quorum set.
    InnerSet(QuorumSet),
}

/// A threshold over node names and nested quorum sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumSet {
    pub threshold: u32,
    pub members: Vec<QuorumSetMember>,
}

/// Resolved quorum set, in the shape the consensus service reads from its
/// `--network` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedQuorumSet {
    pub threshold: u32,
    pub members: Vec<ResolvedMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
pub enum ResolvedMember {
    /// Peer responder id, `localhost:<peer port>`.
    Node(String),
    InnerSet(ResolvedQuorumSet),
}

/// Maps node names to the port their peer listener binds.
pub trait PeerAddressBook {
    fn peer_port(&self, name: &str) -> Option<u16>;
}

impl PeerAddressBook for HashMap<String, u16> {
    fn peer_port(&self, name: &str) -> Option<u16> {
        self.get(name).copied()
    }
}

impl QuorumSet {
    pub fn new(threshold: u32, members: Vec<QuorumSetMember>) -> Self {
        Self { threshold, members }
    }

    /// A flat quorum set over node names.
    pub fn of_nodes<S: AsRef<str>>(threshold: u32, names: &[S]) -> Self {
        Self::new(
            threshold,
            names
                .iter()
                .map(|name| QuorumSetMember::Node(name.as_ref().to_string()))
                .collect(),
        )
    }

    /// Check `1 <= threshold <= |members|` at every nesting level.
    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 || self.threshold as usize > self.members.len() {
            return Err(Error::InvalidThreshold {
                threshold: self.threshold,
                members: self.members.len(),
            });
        }
        for member in &self.members {
            if let QuorumSetMember::InnerSet(inner) = member {
                inner.validate()?;
            }
        }
        Ok(())
    }

    /// Every node name referenced anywhere in this quorum set, in order.
    pub fn node_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for member in &self.members {
            match member {
                QuorumSetMember::Node(name) => names.push(name.as_str()),
                QuorumSetMember::InnerSet(inner) => names.extend(inner.node_names()),
            }
        }
        names
    }

    /// Resolve node names to peer responder ids, recursively. Member order is
    /// preserved so generated files are reproducible.
    pub fn resolve(&self, nodes: &impl PeerAddressBook) -> Result<ResolvedQuorumSet> {
        let members = self
            .members
            .iter()
            .map(|member| match member {
                QuorumSetMember::Node(name) => nodes
                    .peer_port(name)
                    .map(|port| ResolvedMember::Node(format!("localhost:{port}")))
                    .ok_or_else(|| Error::UnknownNode(name.clone())),
                QuorumSetMember::InnerSet(inner) => inner.resolve(nodes).map(ResolvedMember::InnerSet),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ResolvedQuorumSet {
            threshold: self.threshold,
            members,
        })
    }
}

impl TryFrom<&toml::Value> for QuorumSetMember {
    type Error = Error;

    fn try_from(value: &toml::Value) -> Result<Self> {
        match value {
            toml::Value::String(name) => Ok(QuorumSetMember::Node(name.clone())),
            toml::Value::Table(_) => QuorumSet::try_from(value).map(QuorumSetMember::InnerSet),
            other => Err(Error::UnsupportedMemberType(other.type_str().to_string())),
        }
    }
}

impl TryFrom<&toml::Value> for QuorumSet {
    type Error = Error;

    fn try_from(value: &toml::Value) -> Result<Self> {
        let table = value
            .as_table()
            .ok_or_else(|| Error::UnsupportedMemberType(value.type_str().to_string()))?;

        let threshold = table
            .get("threshold")
            .and_then(toml::Value::as_integer)
            .and_then(|t| u32::try_from(t).ok())
            .ok_or_else(|| Error::UnsupportedMemberType("table without a threshold".to_string()))?;

        let members = table
            .get("members")
            .and_then(toml::Value::as_array)
            .ok_or_else(|| Error::UnsupportedMemberType("table without members".to_string()))?
            .iter()
            .map(QuorumSetMember::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(QuorumSet { threshold, members })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn address_book() -> HashMap<String, u16> {
        [("a", 3300), ("b", 3301), ("c", 3302), ("d", 3303)]
            .into_iter()
            .map(|(name, port)| (name.to_string(), port))
            .collect()
    }

    #[test]
    fn test_resolve_flat() {
        let qs = QuorumSet::of_nodes(2, &["b", "c", "a"]);
        let resolved = qs.resolve(&address_book()).unwrap();

        assert_eq!(resolved.threshold, 2);
        assert_eq!(
            resolved.members,
            vec![
                ResolvedMember::Node("localhost:3301".to_string()),
                ResolvedMember::Node("localhost:3302".to_string()),
                ResolvedMember::Node("localhost:3300".to_string()),
            ]
        );
    }

    #[test]
    fn test_resolve_nested_three_levels() {
        let innermost = QuorumSet::of_nodes(1, &["d"]);
        let middle = QuorumSet::new(1, vec![QuorumSetMember::InnerSet(innermost)]);
        let outer = QuorumSet::new(
            2,
            vec![
                QuorumSetMember::Node("a".to_string()),
                QuorumSetMember::InnerSet(middle),
            ],
        );
        let top = QuorumSet::new(1, vec![QuorumSetMember::InnerSet(outer)]);

        let resolved = top.resolve(&address_book()).unwrap();
        let value = serde_json::to_value(&resolved).unwrap();

        assert_eq!(
            value,
            json!({
                "threshold": 1,
                "members": [{
                    "type": "InnerSet",
                    "args": {
                        "threshold": 2,
                        "members": [
                            {"type": "Node", "args": "localhost:3300"},
                            {
                                "type": "InnerSet",
                                "args": {
                                    "threshold": 1,
                                    "members": [{
                                        "type": "InnerSet",
                                        "args": {
                                            "threshold": 1,
                                            "members": [{"type": "Node", "args": "localhost:3303"}],
                                        },
                                    }],
                                },
                            },
                        ],
                    },
                }],
            })
        );
    }

    #[test]
    fn test_resolve_unknown_node() {
        let qs = QuorumSet::new(
            1,
            vec![
                QuorumSetMember::Node("a".to_string()),
                QuorumSetMember::InnerSet(QuorumSet::of_nodes(1, &["zz"])),
            ],
        );
        let before = qs.clone();

        match qs.resolve(&address_book()) {
            Err(Error::UnknownNode(name)) => assert_eq!(name, "zz"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(qs, before);
    }

    #[test]
    fn test_validate_threshold() {
        assert!(QuorumSet::of_nodes(2, &["a", "b"]).validate().is_ok());
        assert!(matches!(
            QuorumSet::of_nodes(0, &["a"]).validate(),
            Err(Error::InvalidThreshold { threshold: 0, members: 1 })
        ));
        let nested = QuorumSet::new(
            1,
            vec![QuorumSetMember::InnerSet(QuorumSet::of_nodes(3, &["a", "b"]))],
        );
        assert!(matches!(
            nested.validate(),
            Err(Error::InvalidThreshold { threshold: 3, members: 2 })
        ));
    }

    #[test]
    fn test_node_names_walks_nested_sets() {
        let qs = QuorumSet::new(
            2,
            vec![
                QuorumSetMember::Node("a".to_string()),
                QuorumSetMember::InnerSet(QuorumSet::of_nodes(1, &["b", "c"])),
            ],
        );
        assert_eq!(qs.node_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parse_from_toml() {
        let value: toml::Value =
            toml::from_str(r#"qs = { threshold = 2, members = ["a", { threshold = 1, members = ["b"] }] }"#)
                .unwrap();

        let qs = QuorumSet::try_from(&value["qs"]).unwrap();
        assert_eq!(
            qs,
            QuorumSet::new(
                2,
                vec![
                    QuorumSetMember::Node("a".to_string()),
                    QuorumSetMember::InnerSet(QuorumSet::of_nodes(1, &["b"])),
                ],
            )
        );
    }

    #[test]
    fn test_parse_unsupported_member() {
        let value: toml::Value =
            toml::from_str(r#"qs = { threshold = 1, members = ["a", 7] }"#).unwrap();

        match QuorumSet::try_from(&value["qs"]) {
            Err(Error::UnsupportedMemberType(kind)) => assert_eq!(kind, "integer"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
