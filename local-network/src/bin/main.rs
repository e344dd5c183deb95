// Copyright (c) 2024 Botho Foundation

//! Local Network Launcher
//!
//! Starts a local consensus network from a named topology and keeps it
//! running until Ctrl-C (or, with `--supervise`, until any service dies).
//!
//! # Usage
//!
//! ```bash
//! # Five fully connected nodes
//! local-network --network-type dense5
//!
//! # Custom topology, overriding the block version
//! local-network --topology-file topology.toml --block-version 3
//!
//! # Poke at a running network
//! nc localhost 31337
//! ```

use std::{path::PathBuf, sync::Arc, thread};

use anyhow::{Context, Result};
use bth_local_network::{
    topology, CrashReport, Error, Network, NetworkConfig, OsLauncher, SupervisionPolicy,
};
use clap::Parser;
use crossbeam_channel::{bounded, never, select};
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[derive(Parser)]
#[command(name = "local-network")]
#[command(about = "Launch and supervise a local consensus test network")]
struct Args {
    /// Topology preset: dense5, a-b-c, ring5 or ring5b
    #[arg(long, required_unless_present = "topology_file")]
    network_type: Option<String>,

    /// TOML file describing a custom topology
    #[arg(long, conflicts_with = "network_type")]
    topology_file: Option<PathBuf>,

    /// Block version passed to every consensus node
    #[arg(long)]
    block_version: Option<u32>,

    /// Orchestrator config file (TOML)
    #[arg(short, long, env = "LOCAL_NETWORK_CONFIG")]
    config: Option<PathBuf>,

    /// Override the working directory
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Override the control server port
    #[arg(long)]
    cli_port: Option<u16>,

    /// Shut the network down as soon as any service exits
    #[arg(long)]
    supervise: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    // RUST_LOG overrides the default level, e.g. per-module filtering.
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => NetworkConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => NetworkConfig::default(),
    };
    if let Some(work_dir) = args.work_dir {
        config.work_dir = work_dir;
    }
    if let Some(cli_port) = args.cli_port {
        config.cli_port = cli_port;
    }
    if args.supervise {
        config.supervision = SupervisionPolicy::Continuous;
    }
    let supervision = config.supervision;

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    info!("Starting network");
    let mut network = Network::new(config, Arc::new(OsLauncher))?;
    let started = match (&args.topology_file, &args.network_type) {
        (Some(path), _) => topology::load_topology(path)
            .and_then(|specs| network.entry_point(specs, args.block_version)),
        (None, Some(name)) => network.default_entry_point(name, args.block_version),
        (None, None) => Err(Error::UnknownTopology(String::new())),
    };
    if let Err(err) = started {
        error!("Failed to start network: {}", err);
        network.stop()?;
        return Err(err.into());
    }

    let crash_rx = match supervision {
        SupervisionPolicy::Continuous => {
            let (crash_tx, crash_rx) = bounded(1);
            let watcher = network.crash_watcher();
            thread::Builder::new()
                .name("crash-watcher".to_string())
                .spawn(move || {
                    let _ = crash_tx.send(watcher.wait());
                })?;
            crash_rx
        }
        SupervisionPolicy::OnDemand => never(),
    };

    let cli_port = network.cli().map(|cli| cli.local_addr().port());
    info!(?cli_port, "Network running. Press Ctrl-C to stop.");

    let crash: Option<CrashReport> = select! {
        recv(stop_rx) -> _ => None,
        recv(crash_rx) -> report => report.ok(),
    };

    info!("Stopping network");
    network.stop()?;

    if let Some(report) = crash {
        anyhow::bail!("{}", report);
    }
    Ok(())
}
