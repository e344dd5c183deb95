// Copyright (c) 2024 Botho Foundation

//! Local consensus network orchestrator.
//!
//! Derives per-node ports, quorum sets and configuration files for a small
//! network of consensus nodes, launches each node's consensus service,
//! ledger distribution and admin HTTP gateway, and serves a TCP control
//! channel for inspecting and restarting individual nodes.

#![deny(clippy::print_stdout)]

pub mod cli;
pub mod config;
pub mod error;
pub mod keys;
pub mod network;
pub mod node;
pub mod peer;
pub mod process;
pub mod quorum_set;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod tokens;
pub mod topology;

pub use cli::NetworkCli;
pub use config::{NetworkConfig, SupervisionPolicy};
pub use error::{Error, Result};
pub use network::{CrashReport, CrashWatcher, Network, NodeRegistry};
pub use node::{Node, NodeStatus, ServiceKind, StartOutcome};
pub use peer::Peer;
pub use process::{OsLauncher, ProcessLauncher};
pub use quorum_set::{QuorumSet, QuorumSetMember};
pub use topology::{NodeSpec, Topology};
