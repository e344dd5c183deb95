// Copyright (c) 2024 Botho Foundation

//! A local network of consensus nodes.

use crate::{
    cli::NetworkCli,
    config::NetworkConfig,
    error::{Error, Result},
    keys,
    node::{Node, ServiceKind, StartOutcome},
    peer::Peer,
    process::{CommandSpec, ProcessLauncher},
    quorum_set::{PeerAddressBook, QuorumSet},
    topology::{self, NodeSpec, Topology},
};
use std::{fmt, fs, io, sync::Arc, thread, time::Duration};
use tracing::{error, info, warn};

const SEEDED_KEY_GEN: &str = "mc-util-seeded-ed25519-key-gen";

/// Process name prefixes swept by [`Network::stop`]. `pkill` matches on the
/// first 15 characters of the process name.
pub const LEFTOVER_PROCESSES: [&str; 6] = [
    "consensus-servi",
    "ledger-distribu",
    "mc-admin-http-g",
    "filebeat",
    "prometheus",
    "mobilecoind",
];

/// Ordered, uniquely named collection of nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: Vec<Arc<Node>>,
}

impl NodeRegistry {
    pub fn insert(&mut self, node: Arc<Node>) -> Result<()> {
        if self.get(node.name()).is_some() {
            return Err(Error::DuplicateNode(node.name().to_string()));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Node>> {
        self.nodes.iter().find(|node| node.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl PeerAddressBook for NodeRegistry {
    fn peer_port(&self, name: &str) -> Option<u16> {
        self.get(name).map(|node| node.ports().peer)
    }
}

/// A supervised process that exited, as reported by [`Network::wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub node: String,
    pub service: ServiceKind,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl fmt::Display for CrashReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node {} {} died with exit code {:?}", self.node, self.service, self.exit_code)
    }
}

/// Polls every supervised process of a network until one exits.
#[derive(Clone)]
pub struct CrashWatcher {
    nodes: Arc<NodeRegistry>,
    poll_interval: Duration,
}

impl CrashWatcher {
    /// Never returns while everything is alive; a crash detector only.
    pub fn wait(&self) -> CrashReport {
        loop {
            for node in self.nodes.iter() {
                if let Some((service, exit_code)) = node.exited_service() {
                    let report = CrashReport {
                        node: node.name().to_string(),
                        service,
                        exit_code,
                    };
                    error!("{}", report);
                    return report;
                }
            }
            thread::sleep(self.poll_interval);
        }
    }
}

pub struct Network {
    config: Arc<NetworkConfig>,
    launcher: Arc<dyn ProcessLauncher>,
    nodes: Arc<NodeRegistry>,
    block_version: u32,
    started: bool,
    cli: Option<NetworkCli>,
}

impl Network {
    /// Create an empty network, wiping and recreating the working directory.
    pub fn new(config: NetworkConfig, launcher: Arc<dyn ProcessLauncher>) -> Result<Self> {
        match fs::remove_dir_all(&config.work_dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        fs::create_dir_all(&config.work_dir)?;

        Ok(Self {
            block_version: config.block_version,
            config: Arc::new(config),
            launcher,
            nodes: Arc::new(NodeRegistry::default()),
            started: false,
            cli: None,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Arc<Node>> {
        self.nodes.get(name)
    }

    pub fn block_version(&self) -> u32 {
        self.block_version
    }

    /// Block version given to nodes added from now on.
    pub fn set_block_version(&mut self, block_version: u32) {
        self.block_version = block_version;
    }

    pub fn cli(&self) -> Option<&NetworkCli> {
        self.cli.as_ref()
    }

    /// Append a node. Its ports are derived from its position in the network.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        peers: Vec<Peer>,
        quorum_set: QuorumSet,
    ) -> Result<Arc<Node>> {
        let name = name.into();
        if self.started {
            return Err(Error::TopologyFrozen(name));
        }
        if self.nodes.get(&name).is_some() {
            return Err(Error::DuplicateNode(name));
        }

        let node = Arc::new(Node::new(
            name,
            self.nodes.len(),
            peers,
            quorum_set,
            self.block_version,
            self.config.clone(),
            self.launcher.clone(),
        )?);
        Arc::make_mut(&mut self.nodes).insert(node.clone())?;
        Ok(node)
    }

    /// Validate and add a whole topology.
    pub fn add_nodes(&mut self, specs: Vec<NodeSpec>) -> Result<()> {
        topology::validate(&specs)?;
        for spec in specs {
            self.add_node(spec.name, spec.peers, spec.quorum_set)?;
        }
        Ok(())
    }

    /// Populate the network from a named preset and start it.
    pub fn default_entry_point(&mut self, topology_name: &str, block_version: Option<u32>) -> Result<()> {
        let topology: Topology = topology_name.parse()?;
        self.entry_point(topology.nodes(), block_version)
    }

    /// Populate the network from explicit node specs and start it.
    pub fn entry_point(&mut self, specs: Vec<NodeSpec>, block_version: Option<u32>) -> Result<()> {
        if let Some(block_version) = block_version {
            self.set_block_version(block_version);
        }
        self.add_nodes(specs)?;
        self.start()
    }

    /// Generate the governor keys and the seeded minting trust root.
    pub fn generate_minting_keys(&self) -> Result<()> {
        let dir = self.config.minting_keys_dir();
        fs::create_dir_all(&dir)?;

        let launcher = &*self.launcher;
        let openssl = &self.config.openssl;
        for governor in ["governor1", "governor2"] {
            let private = dir.join(governor);
            keys::generate_ed25519(launcher, openssl, &private)?;
            keys::write_public_key(launcher, openssl, &private, &dir.join(format!("{governor}.pub")))?;
        }

        keys::seeded_ed25519(
            launcher,
            &self.config.binary(SEEDED_KEY_GEN),
            &self.config.mobilecoin_dir,
            keys::MINTING_TRUST_ROOT_SEED,
            &dir.join("minting-trust-root.pem"),
        )
    }

    /// Start every node in order, then the control server. Anything running
    /// from a previous start is stopped first.
    pub fn start(&mut self) -> Result<()> {
        self.stop()?;

        let specs: Vec<NodeSpec> = self
            .nodes
            .iter()
            .map(|node| NodeSpec::new(node.name(), node.peers().to_vec(), node.quorum_set().clone()))
            .collect();
        topology::validate(&specs)?;
        self.started = true;

        info!("Generating minting keys");
        self.generate_minting_keys()?;

        info!("Starting nodes");
        for node in self.nodes.iter() {
            if let StartOutcome::ConsensusExited(code) = node.start(&self.nodes)? {
                error!(node = %node, exit_code = ?code, "Node failed to start");
            }
        }

        info!("Starting network CLI");
        self.cli = Some(NetworkCli::start(self.config.cli_port, self.nodes.clone())?);
        Ok(())
    }

    /// Block until any supervised process exits and report which one.
    pub fn wait(&self) -> CrashReport {
        self.crash_watcher().wait()
    }

    /// A handle that can wait for crashes from another thread.
    pub fn crash_watcher(&self) -> CrashWatcher {
        CrashWatcher {
            nodes: self.nodes.clone(),
            poll_interval: self.config.poll_interval(),
        }
    }

    /// Stop the control server and every node, then kill leftover service
    /// processes by name. The working directory is kept for inspection.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(cli) = self.cli.take() {
            cli.stop();
        }

        for node in self.nodes.iter() {
            node.stop();
        }

        info!("Killing any existing processes");
        for pattern in LEFTOVER_PROCESSES {
            let spec = CommandSpec::new(&self.config.pkill).args(["-9", pattern]);
            match self.launcher.run(&spec) {
                // pkill exits with 1 when nothing matched.
                Ok(output) if output.success() || output.status == Some(1) => {}
                Ok(output) => warn!(
                    pattern,
                    status = ?output.status,
                    "pkill failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(err) => warn!(pattern, "Failed to run pkill: {}", err),
            }
        }
        Ok(())
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        if let Some(cli) = self.cli.take() {
            cli.stop();
        }
    }
}
