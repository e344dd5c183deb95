// Copyright (c) 2024 Botho Foundation

//! Directly connected peers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A node this node exchanges consensus messages with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PeerEntry")]
pub struct Peer {
    /// Name of the referenced node
    pub name: String,
    /// Whether consensus messages are broadcast to this peer
    pub broadcast_consensus_msgs: bool,
}

impl Peer {
    /// A peer that receives broadcast consensus messages.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            broadcast_consensus_msgs: true,
        }
    }

    /// A peer we stay connected to but never broadcast consensus messages to.
    pub fn silent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            broadcast_consensus_msgs: false,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Topology files accept either a bare name or a full table.
#[derive(Deserialize)]
#[serde(untagged)]
enum PeerEntry {
    Name(String),
    Full {
        name: String,
        #[serde(default = "default_broadcast")]
        broadcast_consensus_msgs: bool,
    },
}

fn default_broadcast() -> bool {
    true
}

impl From<PeerEntry> for Peer {
    fn from(entry: PeerEntry) -> Self {
        match entry {
            PeerEntry::Name(name) => Peer::new(name),
            PeerEntry::Full {
                name,
                broadcast_consensus_msgs,
            } => Peer {
                name,
                broadcast_consensus_msgs,
            },
        }
    }
}
