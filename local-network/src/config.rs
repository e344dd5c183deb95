// Copyright (c) 2024 Botho Foundation

//! Orchestrator configuration.
//!
//! Every path, port family and tool the orchestrator touches is described
//! here so that several networks can run side by side (e.g. in tests) and so
//! that process launching can be swapped out.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// How crashes of supervised processes are detected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SupervisionPolicy {
    /// Crash detection only runs when `Network::wait` is called explicitly.
    #[default]
    OnDemand,
    /// The entry point watches for crashes alongside the control server and
    /// tears the network down on the first one.
    Continuous,
}

/// Configuration shared by a network and all of its nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Scratch directory, wiped when a network is created.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Working directory the service binaries are launched from.
    #[serde(default = "default_mobilecoin_dir")]
    pub mobilecoin_dir: PathBuf,

    /// Directory containing the service binaries.
    #[serde(default = "default_target_dir")]
    pub target_dir: PathBuf,

    /// Origin block ledger handed to every consensus node.
    #[serde(default = "default_origin_block_path")]
    pub origin_block_path: PathBuf,

    #[serde(default = "default_base_client_port")]
    pub base_client_port: u16,

    #[serde(default = "default_base_peer_port")]
    pub base_peer_port: u16,

    #[serde(default = "default_base_admin_port")]
    pub base_admin_port: u16,

    #[serde(default = "default_base_admin_http_gateway_port")]
    pub base_admin_http_gateway_port: u16,

    /// Port of the network control server. 0 picks an ephemeral port.
    #[serde(default = "default_cli_port")]
    pub cli_port: u16,

    /// Block version used when a run does not override it.
    #[serde(default = "default_block_version")]
    pub block_version: u32,

    /// Minimum fee of token 0.
    #[serde(default = "default_minimum_fee")]
    pub minimum_fee: u64,

    /// Minimum fee of the governed tokens.
    #[serde(default = "default_governor_minimum_fee")]
    pub governor_minimum_fee: u64,

    #[serde(default = "default_ias_api_key")]
    pub ias_api_key: String,

    #[serde(default = "default_ias_spid")]
    pub ias_spid: String,

    /// Interval between readiness and liveness polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub supervision: SupervisionPolicy,

    /// Redirect service output into `<work_dir>/logs` instead of inheriting
    /// the orchestrator's stdout/stderr.
    #[serde(default)]
    pub service_logs: bool,

    #[serde(default = "default_openssl")]
    pub openssl: PathBuf,

    #[serde(default = "default_pkill")]
    pub pkill: PathBuf,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/tmp/mc-local-network")
}

fn default_mobilecoin_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_target_dir() -> PathBuf {
    PathBuf::from("target/release")
}

fn default_origin_block_path() -> PathBuf {
    PathBuf::from("target/sample_data/ledger")
}

fn default_base_client_port() -> u16 {
    3200
}

fn default_base_peer_port() -> u16 {
    3300
}

fn default_base_admin_port() -> u16 {
    3400
}

fn default_base_admin_http_gateway_port() -> u16 {
    3500
}

fn default_cli_port() -> u16 {
    31337
}

fn default_block_version() -> u32 {
    2
}

fn default_minimum_fee() -> u64 {
    400_000_000
}

fn default_governor_minimum_fee() -> u64 {
    1024
}

fn default_ias_api_key() -> String {
    std::env::var("IAS_API_KEY").unwrap_or_else(|_| "0".repeat(32))
}

fn default_ias_spid() -> String {
    std::env::var("IAS_SPID").unwrap_or_else(|_| "0".repeat(32))
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_openssl() -> PathBuf {
    PathBuf::from("openssl")
}

fn default_pkill() -> PathBuf {
    PathBuf::from("pkill")
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            mobilecoin_dir: default_mobilecoin_dir(),
            target_dir: default_target_dir(),
            origin_block_path: default_origin_block_path(),
            base_client_port: default_base_client_port(),
            base_peer_port: default_base_peer_port(),
            base_admin_port: default_base_admin_port(),
            base_admin_http_gateway_port: default_base_admin_http_gateway_port(),
            cli_port: default_cli_port(),
            block_version: default_block_version(),
            minimum_fee: default_minimum_fee(),
            governor_minimum_fee: default_governor_minimum_fee(),
            ias_api_key: default_ias_api_key(),
            ias_spid: default_ias_spid(),
            poll_interval_ms: default_poll_interval_ms(),
            supervision: SupervisionPolicy::default(),
            service_logs: false,
            openssl: default_openssl(),
            pkill: default_pkill(),
        }
    }
}

impl NetworkConfig {
    /// Load a config from a TOML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Default config rooted at a different working directory.
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Default::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Directory holding the governor and minting trust root keys.
    pub fn minting_keys_dir(&self) -> PathBuf {
        self.work_dir.join("minting-keys")
    }

    /// Directory receiving service output when `service_logs` is set.
    pub fn logs_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    /// Full path of a service binary.
    pub fn binary(&self, name: &str) -> PathBuf {
        self.target_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.base_client_port, 3200);
        assert_eq!(config.base_peer_port, 3300);
        assert_eq!(config.base_admin_port, 3400);
        assert_eq!(config.base_admin_http_gateway_port, 3500);
        assert_eq!(config.cli_port, 31337);
        assert_eq!(config.block_version, 2);
        assert_eq!(config.minimum_fee, 400_000_000);
        assert_eq!(config.supervision, SupervisionPolicy::OnDemand);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: NetworkConfig = toml::from_str(
            r#"
work_dir = "/tmp/elsewhere"
cli_port = 0
supervision = "continuous"
"#,
        )
        .unwrap();

        assert_eq!(config.work_dir, PathBuf::from("/tmp/elsewhere"));
        assert_eq!(config.cli_port, 0);
        assert_eq!(config.supervision, SupervisionPolicy::Continuous);
        assert_eq!(config.base_peer_port, 3300);
        assert_eq!(
            config.minting_keys_dir(),
            PathBuf::from("/tmp/elsewhere/minting-keys")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.toml");
        fs::write(&path, "base_peer_port = 4300\nservice_logs = true\n").unwrap();

        let config = NetworkConfig::load(&path).unwrap();
        assert_eq!(config.base_peer_port, 4300);
        assert!(config.service_logs);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.toml");
        fs::write(&path, "base_peer_port = \"not a port\"").unwrap();

        assert!(matches!(
            NetworkConfig::load(&path),
            Err(crate::Error::Config(_))
        ));
    }
}
