// Copyright (c) 2024 Botho Foundation

//! A single consensus node and the auxiliary services that run next to it.
//!
//! Each node owns three processes: the consensus service, a ledger
//! distribution process republishing its ledger, and an admin HTTP gateway.
//! Starting and stopping a node is serialized by a per-node lifecycle lock.
//! The process handles sit behind a second lock that is only ever held
//! briefly, so status checks never wait on a node that is starting.

use crate::{
    config::NetworkConfig,
    error::{Error, Result},
    keys,
    network::NodeRegistry,
    peer::Peer,
    process::{ChildProcess, CommandSpec, ProcessLauncher},
    quorum_set::{QuorumSet, ResolvedQuorumSet},
    tokens::{self, TokensConfig},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};
use tracing::{debug, info, warn};

const CONSENSUS_SERVICE: &str = "consensus-service";
const LEDGER_DISTRIBUTION: &str = "ledger-distribution";
const ADMIN_HTTP_GATEWAY: &str = "mc-admin-http-gateway";
const MINT_CLIENT: &str = "mc-consensus-mint-client";

/// The services supervised for every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Consensus,
    LedgerDistribution,
    AdminHttpGateway,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceKind::Consensus => "consensus service",
            ServiceKind::LedgerDistribution => "ledger distribution",
            ServiceKind::AdminHttpGateway => "admin http gateway",
        })
    }
}

/// Liveness of a node's consensus process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Never started, or explicitly stopped
    Stopped,
    /// Started, but the process has terminated
    Exited,
    Running { pid: u32 },
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Stopped => f.write_str("stopped"),
            NodeStatus::Exited => f.write_str("exited"),
            NodeStatus::Running { pid } => write!(f, "running, pid={pid}"),
        }
    }
}

/// Result of [`Node::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// All three services were launched.
    Started,
    /// The consensus service died before creating its ledger. The auxiliary
    /// services were not launched.
    ConsensusExited(Option<i32>),
}

/// Ports of one node, each `base + node_num`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePorts {
    pub client: u16,
    pub peer: u16,
    pub admin: u16,
    pub admin_http_gateway: u16,
}

impl NodePorts {
    pub fn for_node(config: &NetworkConfig, node_num: usize) -> Self {
        let offset = node_num as u16;
        Self {
            client: config.base_client_port + offset,
            peer: config.base_peer_port + offset,
            admin: config.base_admin_port + offset,
            admin_http_gateway: config.base_admin_http_gateway_port + offset,
        }
    }
}

/// Contents of `node<N>-network.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeNetworkConfig {
    pub quorum_set: ResolvedQuorumSet,
    pub broadcast_peers: Vec<String>,
    pub known_peers: Vec<String>,
    pub tx_source_urls: Vec<String>,
}

#[derive(Default)]
struct NodeProcesses {
    consensus: Option<Box<dyn ChildProcess>>,
    ledger_distribution: Option<Box<dyn ChildProcess>>,
    admin_http_gateway: Option<Box<dyn ChildProcess>>,
}

impl NodeProcesses {
    fn slots(&mut self) -> [(ServiceKind, &mut Option<Box<dyn ChildProcess>>); 3] {
        [
            (ServiceKind::Consensus, &mut self.consensus),
            (ServiceKind::LedgerDistribution, &mut self.ledger_distribution),
            (ServiceKind::AdminHttpGateway, &mut self.admin_http_gateway),
        ]
    }
}

pub struct Node {
    name: String,
    node_num: usize,
    ports: NodePorts,
    peers: Vec<Peer>,
    quorum_set: QuorumSet,
    block_version: u32,
    minimum_fee: u64,
    config: Arc<NetworkConfig>,
    launcher: Arc<dyn ProcessLauncher>,
    /// Held for the whole of `start` and `stop`.
    lifecycle: Mutex<()>,
    processes: Mutex<NodeProcesses>,
}

impl Node {
    /// Create a node and generate its message signing key.
    pub fn new(
        name: impl Into<String>,
        node_num: usize,
        peers: Vec<Peer>,
        quorum_set: QuorumSet,
        block_version: u32,
        config: Arc<NetworkConfig>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<Self> {
        let node = Self {
            name: name.into(),
            node_num,
            ports: NodePorts::for_node(&config, node_num),
            peers,
            quorum_set,
            block_version,
            minimum_fee: config.minimum_fee,
            config,
            launcher,
            lifecycle: Mutex::new(()),
            processes: Mutex::new(NodeProcesses::default()),
        };
        keys::generate_ed25519(
            node.launcher.as_ref(),
            &node.config.openssl,
            &node.msg_signer_key_file(),
        )?;
        Ok(node)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_num(&self) -> usize {
        self.node_num
    }

    pub fn ports(&self) -> NodePorts {
        self.ports
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn quorum_set(&self) -> &QuorumSet {
        &self.quorum_set
    }

    pub fn block_version(&self) -> u32 {
        self.block_version
    }

    pub fn minimum_fee(&self) -> u64 {
        self.minimum_fee
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.work_path(format!("node-ledger-{}", self.node_num))
    }

    pub fn ledger_distribution_dir(&self) -> PathBuf {
        self.work_path(format!("node-ledger-distribution-{}", self.node_num))
    }

    pub fn msg_signer_key_file(&self) -> PathBuf {
        self.work_path(format!("node-scp-{}.pem", self.node_num))
    }

    pub fn tokens_config_file(&self) -> PathBuf {
        self.work_path(format!("node-tokens-{}.json", self.node_num))
    }

    pub fn network_config_file(&self) -> PathBuf {
        self.work_path(format!("node{}-network.json", self.node_num))
    }

    pub fn scp_debug_dump_dir(&self) -> PathBuf {
        self.work_path(format!("scp-debug-dump-{}", self.node_num))
    }

    /// The consensus service creates this once its ledger is usable.
    pub fn ledger_db(&self) -> PathBuf {
        self.ledger_dir().join("data.mdb")
    }

    fn work_path(&self, name: String) -> PathBuf {
        self.config.work_dir.join(name)
    }

    fn log_file(&self, service: &str) -> Option<PathBuf> {
        self.config
            .service_logs
            .then(|| self.config.logs_dir().join(format!("{}-{service}.log", self.name)))
    }

    /// URI other nodes use to connect to this node's peer listener.
    pub fn peer_uri(&self, broadcast_consensus_msgs: bool) -> Result<String> {
        let pub_key = keys::public_key_fingerprint(
            self.launcher.as_ref(),
            &self.config.openssl,
            &self.msg_signer_key_file(),
        )?;
        Ok(format!(
            "insecure-mcp://localhost:{}/?consensus-msg-key={}&broadcast-consensus-msgs={}",
            self.ports.peer,
            pub_key,
            u8::from(broadcast_consensus_msgs)
        ))
    }

    /// Derive this node's network configuration against the full registry.
    pub fn network_config(&self, nodes: &NodeRegistry) -> Result<NodeNetworkConfig> {
        let broadcast_peers = self
            .peers
            .iter()
            .map(|peer| {
                nodes
                    .get(&peer.name)
                    .ok_or_else(|| Error::UnknownNode(peer.name.clone()))?
                    .peer_uri(peer.broadcast_consensus_msgs)
            })
            .collect::<Result<Vec<_>>>()?;

        let is_peer = |node: &Node| self.peers.iter().any(|peer| peer.name == node.name);

        // Nodes we do not connect to directly may still appear in our quorum set.
        let known_peers = nodes
            .iter()
            .filter(|node| !is_peer(node) && node.name != self.name)
            .map(|node| node.peer_uri(true))
            .collect::<Result<Vec<_>>>()?;

        let tx_source_urls = nodes
            .iter()
            .filter(|node| is_peer(node))
            .map(|node| format!("file://{}", node.ledger_distribution_dir().display()))
            .collect();

        Ok(NodeNetworkConfig {
            quorum_set: self.quorum_set.resolve(nodes)?,
            broadcast_peers,
            known_peers,
            tx_source_urls,
        })
    }

    /// Write configuration files and launch this node's services.
    ///
    /// Blocks until the consensus service has created its ledger, or has
    /// exited, in which case the node is stopped and the auxiliary services
    /// are never launched.
    pub fn start(&self, nodes: &NodeRegistry) -> Result<StartOutcome> {
        let _lifecycle = self.lifecycle.lock();

        {
            let mut processes = self.processes.lock();
            if let Some(consensus) = processes.consensus.as_mut() {
                if consensus.is_running() {
                    return Err(Error::NodeAlreadyRunning(self.name.clone()));
                }
                processes.consensus = None;
            }
            for (kind, slot) in processes.slots() {
                if let Some(mut process) = slot.take() {
                    if process.is_running() {
                        if let Err(err) = process.terminate() {
                            warn!(node = %self.name, service = %kind, "Failed to terminate leftover process: {}", err);
                        }
                    }
                }
            }
        }

        let msg_signer_key = keys::private_key_body(&self.msg_signer_key_file())?;

        let network_config = self.network_config(nodes)?;
        let network_json_path = self.network_config_file();
        fs::write(&network_json_path, serde_json::to_string(&network_config)?)?;

        match fs::remove_dir_all(self.scp_debug_dump_dir()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(node = %self.name, "Failed to remove scp debug dump: {}", err),
        }

        self.write_tokens_config()?;

        if self.config.service_logs {
            fs::create_dir_all(self.config.logs_dir())?;
        }

        let cmd = self.consensus_command(&msg_signer_key, &network_json_path);
        info!(
            node = %self.name,
            client_port = self.ports.client,
            peer_port = self.ports.peer,
            admin_port = self.ports.admin,
            "Starting node"
        );
        info!(" - Peers: {:?}", self.peers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>());
        info!(" - Quorum set: {}", serde_json::to_string_pretty(&network_config)?);
        debug!("{}", cmd);
        let consensus = self.launcher.spawn(&cmd)?;
        self.processes.lock().consensus = Some(consensus);

        let ledger_db = self.ledger_db();
        while !ledger_db.exists() {
            let exited = match self.processes.lock().consensus.as_mut() {
                Some(consensus) => consensus.try_exit_code()?,
                None => None,
            };
            if let Some(code) = exited {
                warn!(node = %self.name, exit_code = ?code, "consensus process crashed");
                self.stop_processes();
                return Ok(StartOutcome::ConsensusExited(code));
            }
            debug!("Waiting for {}", ledger_db.display());
            thread::sleep(self.config.poll_interval());
        }

        let cmd = self.ledger_distribution_command();
        info!(node = %self.name, "Starting local ledger distribution: {}", cmd);
        let ledger_distribution = self.launcher.spawn(&cmd)?;
        self.processes.lock().ledger_distribution = Some(ledger_distribution);

        let cmd = self.admin_http_gateway_command();
        info!(node = %self.name, "Starting admin http gateway: {}", cmd);
        let admin_http_gateway = self.launcher.spawn(&cmd)?;
        self.processes.lock().admin_http_gateway = Some(admin_http_gateway);

        Ok(StartOutcome::Started)
    }

    fn write_tokens_config(&self) -> Result<()> {
        let keys_dir = self.config.minting_keys_dir();
        let tokens_file = self.tokens_config_file();

        TokensConfig::local_network(
            self.minimum_fee,
            self.config.governor_minimum_fee,
            fs::read_to_string(keys_dir.join("governor1.pub"))?,
            fs::read_to_string(keys_dir.join("governor2.pub"))?,
        )
        .write(&tokens_file)?;

        tokens::sign_governors(
            self.launcher.as_ref(),
            &self.config.binary(MINT_CLIENT),
            &self.config.mobilecoin_dir,
            &tokens_file,
            &keys_dir.join("minting-trust-root.pem"),
        )
    }

    fn consensus_command(&self, msg_signer_key: &str, network_json_path: &Path) -> CommandSpec {
        let config = &self.config;
        let work_dir = &config.work_dir;
        let num = self.node_num;

        CommandSpec::new(config.binary(CONSENSUS_SERVICE))
            .current_dir(&config.mobilecoin_dir)
            .args([
                "--client-responder-id".to_string(),
                format!("localhost:{}", self.ports.client),
                "--peer-responder-id".to_string(),
                format!("localhost:{}", self.ports.peer),
                "--msg-signer-key".to_string(),
                msg_signer_key.to_string(),
            ])
            .path_arg("--network", network_json_path)
            .arg(format!("--ias-api-key={}", config.ias_api_key))
            .arg(format!("--ias-spid={}", config.ias_spid))
            .path_arg("--origin-block-path", &config.origin_block_path)
            .args(["--block-version".to_string(), self.block_version.to_string()])
            .path_arg("--ledger-path", &self.ledger_dir())
            .arg(format!("--admin-listen-uri=insecure-mca://0.0.0.0:{}/", self.ports.admin))
            .arg(format!("--client-listen-uri=insecure-mc://0.0.0.0:{}/", self.ports.client))
            .arg(format!("--peer-listen-uri=insecure-mcp://0.0.0.0:{}/", self.ports.peer))
            .path_arg("--scp-debug-dump", &self.scp_debug_dump_dir())
            .path_arg(
                "--sealed-block-signing-key",
                &work_dir.join(format!("consensus-sealed-block-signing-key-{num}")),
            )
            .arg(format!("--tokens={}", self.tokens_config_file().display()))
            .log_file(self.log_file("consensus"))
    }

    fn ledger_distribution_command(&self) -> CommandSpec {
        CommandSpec::new(self.config.binary(LEDGER_DISTRIBUTION))
            .current_dir(&self.config.mobilecoin_dir)
            .path_arg("--ledger-path", &self.ledger_dir())
            .arg("--dest")
            .arg(format!("file://{}", self.ledger_distribution_dir().display()))
            .path_arg(
                "--state-file",
                &self
                    .config
                    .work_dir
                    .join(format!("ledger-distribution-state-{}", self.node_num)),
            )
            .log_file(self.log_file("ledger-distribution"))
    }

    fn admin_http_gateway_command(&self) -> CommandSpec {
        CommandSpec::new(self.config.binary(ADMIN_HTTP_GATEWAY))
            .current_dir(&self.config.mobilecoin_dir)
            .env("ROCKET_CLI_COLORS", "0")
            .args([
                "--listen-host".to_string(),
                "0.0.0.0".to_string(),
                "--listen-port".to_string(),
                self.ports.admin_http_gateway.to_string(),
                "--admin-uri".to_string(),
                format!("insecure-mca://127.0.0.1:{}/", self.ports.admin),
            ])
            .log_file(self.log_file("admin-http-gateway"))
    }

    /// Status of the consensus process, without blocking on it.
    pub fn status(&self) -> NodeStatus {
        let mut processes = self.processes.lock();
        match processes.consensus.as_mut() {
            None => NodeStatus::Stopped,
            Some(consensus) => match consensus.try_exit_code() {
                Ok(None) => NodeStatus::Running { pid: consensus.id() },
                Ok(Some(_)) => NodeStatus::Exited,
                Err(err) => {
                    warn!(node = %self.name, "Failed to poll consensus process: {}", err);
                    NodeStatus::Exited
                }
            },
        }
    }

    /// First supervised service found to have exited, with its exit code.
    pub fn exited_service(&self) -> Option<(ServiceKind, Option<i32>)> {
        let mut processes = self.processes.lock();
        let NodeProcesses {
            consensus,
            ledger_distribution,
            admin_http_gateway,
        } = &mut *processes;

        let exited = [
            (ServiceKind::Consensus, consensus),
            (ServiceKind::AdminHttpGateway, admin_http_gateway),
            (ServiceKind::LedgerDistribution, ledger_distribution),
        ]
        .into_iter()
        .find_map(|(kind, slot)| {
            let process = slot.as_mut()?;
            match process.try_exit_code() {
                Ok(Some(code)) => Some((kind, code)),
                Ok(None) => None,
                Err(err) => {
                    warn!(node = %self.name, service = %kind, "Failed to poll process: {}", err);
                    None
                }
            }
        });
        exited
    }

    /// Ask every live service of this node to terminate. Safe to call any
    /// number of times.
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.stop_processes();
    }

    fn stop_processes(&self) {
        let mut processes = self.processes.lock();
        for (kind, slot) in processes.slots() {
            if let Some(process) = slot.as_mut() {
                if process.is_running() {
                    if let Err(err) = process.terminate() {
                        warn!(node = %self.name, service = %kind, "Failed to terminate: {}", err);
                    }
                    *slot = None;
                }
            }
        }
        info!("Stopped node {}!", self.name);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("node_num", &self.node_num)
            .field("ports", &self.ports)
            .field("peers", &self.peers)
            .finish()
    }
}
