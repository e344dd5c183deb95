// Copyright (c) 2024 Botho Foundation

//! Network control server.
//!
//! A line-oriented text protocol over TCP for inspecting and restarting
//! individual nodes while the network runs:
//!
//! ```text
//! > status
//! a: running, pid=4242
//! b: exited
//! > stop a
//! Stopped a.
//! > start a
//! Started a.
//! ```

use crate::{
    error::Result,
    network::NodeRegistry,
    node::{ServiceKind, StartOutcome},
};
use std::{
    fmt::Write as _,
    io::{self, BufRead, BufReader, Write},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, info, warn};

const PROMPT: &[u8] = b"> ";

/// Background control server bound to a fixed port.
pub struct NetworkCli {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl NetworkCli {
    /// Bind `port` on all interfaces and serve `nodes` from a background
    /// thread. Each connection gets its own thread.
    pub fn start(port: u16, nodes: Arc<NodeRegistry>) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        info!(%local_addr, "Network CLI listening");

        let handle = {
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("network-cli".to_string())
                .spawn(move || accept_loop(listener, nodes, shutdown))?
        };

        Ok(Self {
            local_addr,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the listening socket. Connections already being served are
    /// left to finish on their own.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the accept loop so it notices the flag.
        let wake = SocketAddr::from((Ipv4Addr::LOCALHOST, self.local_addr.port()));
        if let Err(err) = TcpStream::connect(wake) {
            warn!("Failed to wake network CLI: {}", err);
            return;
        }
        if handle.join().is_err() {
            warn!("Network CLI thread panicked");
        }
        info!("Network CLI stopped");
    }
}

impl Drop for NetworkCli {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, nodes: Arc<NodeRegistry>, shutdown: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let nodes = nodes.clone();
                let spawned = thread::Builder::new()
                    .name("network-cli-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &nodes) {
                            debug!("Network CLI connection closed: {}", err);
                        }
                    });
                if let Err(err) = spawned {
                    warn!("Failed to spawn network CLI connection thread: {}", err);
                }
            }
            Err(err) => warn!("Network CLI accept failed: {}", err),
        }
    }
}

fn handle_connection(stream: TcpStream, nodes: &NodeRegistry) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    writer.write_all(PROMPT)?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let response = handle_command(line.trim(), nodes);
        writer.write_all(response.as_bytes())?;
        writer.write_all(PROMPT)?;
    }
}

/// Execute one command line and return the reply, without the prompt.
pub fn handle_command(line: &str, nodes: &NodeRegistry) -> String {
    if line.is_empty() {
        return String::new();
    }
    let (cmd, args) = line.split_once(' ').unwrap_or((line, ""));

    match cmd {
        "status" => nodes.iter().fold(String::new(), |mut out, node| {
            let _ = writeln!(out, "{}: {}", node.name(), node.status());
            out
        }),
        "stop" => match nodes.get(args) {
            Some(node) => {
                node.stop();
                format!("Stopped {args}.\n")
            }
            None => format!("Unknown node {args}\n"),
        },
        "start" => match nodes.get(args) {
            Some(node) => {
                node.stop();
                match node.start(nodes) {
                    Ok(StartOutcome::Started) => format!("Started {args}.\n"),
                    Ok(StartOutcome::ConsensusExited(code)) => format!(
                        "Failed to start {args}: {} exited with code {code:?}\n",
                        ServiceKind::Consensus
                    ),
                    Err(err) => format!("Failed to start {args}: {err}\n"),
                }
            }
            None => format!("Unknown node {args}\n"),
        },
        _ => "Unknown command\n".to_string(),
    }
}
