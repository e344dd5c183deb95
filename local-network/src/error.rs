// Copyright (c) 2024 Botho Foundation

//! Error types for the local network orchestrator.

use std::{io, path::PathBuf};
use thiserror::Error;

/// Errors raised while deriving configuration for, or supervising, a local
/// network.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested topology preset does not exist.
    #[error("Unknown topology: {0}")]
    UnknownTopology(String),

    /// A peer list or quorum set references a node that is not in the network.
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// A quorum set member is neither a node name nor a nested quorum set.
    #[error("Unsupported quorum set member type: {0}")]
    UnsupportedMemberType(String),

    /// A quorum set threshold is zero or exceeds its member count.
    #[error("Invalid threshold {threshold} for a quorum set with {members} members")]
    InvalidThreshold { threshold: u32, members: usize },

    /// Two nodes share a name.
    #[error("Duplicate node name: {0}")]
    DuplicateNode(String),

    /// Nodes may only be added before the network is started.
    #[error("Cannot add node {0}: the network has already been started")]
    TopologyFrozen(String),

    /// The consensus process of this node is still alive.
    #[error("Node {0} is already running")]
    NodeAlreadyRunning(String),

    /// An external tool exited with a non-zero status.
    #[error("{tool} failed with status {status:?}: {stderr}")]
    ExternalTool {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },

    /// A process could not be spawned at all.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("PEM error: {0}")]
    Pem(#[from] pem::PemError),

    /// Delivering a signal to a child process failed.
    #[error("Signal error: {0}")]
    Signal(#[from] nix::errno::Errno),
}

/// Result type for local network operations.
pub type Result<T> = std::result::Result<T, Error>;
