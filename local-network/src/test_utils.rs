// Copyright (c) 2024 Botho Foundation

//! A scriptable [`ProcessLauncher`] for exercising nodes and networks without
//! any real binaries.

use crate::{
    error::Result,
    process::{ChildProcess, CommandSpec, ProcessLauncher, ToolOutput},
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};

/// How a fake child started for a given program behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Runs until terminated. Consensus services also create their ledger.
    RunForever,
    /// Runs until terminated without ever creating a ledger.
    NeverReady,
    /// Exits with the given code right after spawning.
    ExitImmediately(Option<i32>),
}

#[derive(Default)]
struct FakeState {
    runs: Vec<CommandSpec>,
    spawns: Vec<CommandSpec>,
    behaviors: HashMap<String, FakeBehavior>,
    failing_tools: HashMap<String, i32>,
    children: Vec<Arc<Mutex<Option<Option<i32>>>>>,
}

/// Records every command and emulates the external tools used by the
/// orchestrator: `openssl`, the seeded key generator, the mint client and
/// `pkill`.
#[derive(Default)]
pub struct FakeLauncher {
    state: Mutex<FakeState>,
    next_pid: AtomicU32,
    key_counter: AtomicU32,
    terminated: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Default::default()
        }
    }

    /// Set the behavior of children spawned for `program`.
    pub fn set_behavior(&self, program: &str, behavior: FakeBehavior) {
        self.state
            .lock()
            .behaviors
            .insert(program.to_string(), behavior);
    }

    /// Make every run of `program` exit with `status`.
    pub fn fail_tool(&self, program: &str, status: i32) {
        self.state
            .lock()
            .failing_tools
            .insert(program.to_string(), status);
    }

    /// Make every child spawned so far exit with `code`.
    pub fn crash_all(&self, code: i32) {
        for child in &self.state.lock().children {
            child.lock().get_or_insert(Some(code));
        }
    }

    /// Number of tool runs whose program or arguments mention `needle`.
    pub fn count_runs(&self, needle: &str) -> usize {
        self.state
            .lock()
            .runs
            .iter()
            .filter(|spec| mentions(spec, needle))
            .count()
    }

    /// Tool runs of `program`, in order.
    pub fn runs_of(&self, program: &str) -> Vec<CommandSpec> {
        self.state
            .lock()
            .runs
            .iter()
            .filter(|spec| spec.program_name() == program)
            .cloned()
            .collect()
    }

    pub fn count_spawns(&self, program: &str) -> usize {
        self.state
            .lock()
            .spawns
            .iter()
            .filter(|spec| spec.program_name() == program)
            .count()
    }

    pub fn last_spawn(&self, program: &str) -> Option<CommandSpec> {
        self.state
            .lock()
            .spawns
            .iter()
            .rev()
            .find(|spec| spec.program_name() == program)
            .cloned()
    }

    /// Number of `terminate` calls made on any child.
    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    fn fake_private_key(&self) -> String {
        let n = self.key_counter.fetch_add(1, Ordering::SeqCst);
        let mut contents = vec![0u8; 48];
        contents[..4].copy_from_slice(&n.to_be_bytes());
        pem::encode(&pem::Pem::new("PRIVATE KEY", contents))
    }

    fn fake_tool(&self, spec: &CommandSpec) -> Result<Vec<u8>> {
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        match args.first().copied() {
            Some("genpkey") => {
                if let Some(out) = spec.flag_value("-out") {
                    fs::write(out, self.fake_private_key())?;
                }
                Ok(Vec::new())
            }
            Some("pkey") => {
                let input = spec.flag_value("-in").unwrap_or_default();
                let private = pem::parse(fs::read(input)?)?;
                let mut public = private.contents().to_vec();
                public.reverse();
                let encoded = pem::encode(&pem::Pem::new("PUBLIC KEY", public));
                match spec.flag_value("-out") {
                    Some(out) => {
                        fs::write(out, encoded)?;
                        Ok(Vec::new())
                    }
                    None => Ok(encoded.into_bytes()),
                }
            }
            Some("--seed") => Ok(self.fake_private_key().into_bytes()),
            _ => Ok(Vec::new()),
        }
    }
}

fn mentions(spec: &CommandSpec, needle: &str) -> bool {
    spec.program_name() == needle || spec.args.iter().any(|arg| arg == needle)
}

impl ProcessLauncher for FakeLauncher {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ChildProcess>> {
        let behavior = {
            let mut state = self.state.lock();
            state.spawns.push(spec.clone());
            state
                .behaviors
                .get(&spec.program_name())
                .copied()
                .unwrap_or(FakeBehavior::RunForever)
        };

        let exit = match behavior {
            FakeBehavior::RunForever => {
                if let Some(ledger) = spec.flag_value("--ledger-path") {
                    fs::create_dir_all(ledger)?;
                    fs::write(Path::new(ledger).join("data.mdb"), b"")?;
                }
                None
            }
            FakeBehavior::NeverReady => None,
            FakeBehavior::ExitImmediately(code) => Some(code),
        };

        let exit = Arc::new(Mutex::new(exit));
        self.state.lock().children.push(exit.clone());

        Ok(Box::new(FakeChild {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            exit,
            terminated: self.terminated.clone(),
        }))
    }

    fn run(&self, spec: &CommandSpec) -> Result<ToolOutput> {
        let failing = {
            let mut state = self.state.lock();
            state.runs.push(spec.clone());
            state.failing_tools.get(&spec.program_name()).copied()
        };

        if let Some(status) = failing {
            return Ok(ToolOutput {
                status: Some(status),
                stdout: Vec::new(),
                stderr: format!("{} failed", spec.program_name()).into_bytes(),
            });
        }

        Ok(ToolOutput {
            status: Some(0),
            stdout: self.fake_tool(spec)?,
            stderr: Vec::new(),
        })
    }
}

struct FakeChild {
    pid: u32,
    exit: Arc<Mutex<Option<Option<i32>>>>,
    terminated: Arc<AtomicUsize>,
}

impl ChildProcess for FakeChild {
    fn id(&self) -> u32 {
        self.pid
    }

    fn try_exit_code(&mut self) -> Result<Option<Option<i32>>> {
        Ok(*self.exit.lock())
    }

    fn terminate(&mut self) -> Result<()> {
        self.terminated.fetch_add(1, Ordering::SeqCst);
        self.exit.lock().get_or_insert(None);
        Ok(())
    }
}
