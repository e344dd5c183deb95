// Copyright (c) 2024 Botho Foundation

//! Launching and supervising external processes.
//!
//! Nodes never touch `std::process` directly. They describe what to run with
//! a [`CommandSpec`] and hand it to a [`ProcessLauncher`], which makes the
//! topology and lifecycle logic testable without real binaries.

use crate::error::{Error, Result};
use std::{
    fmt,
    fs::File,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
};

/// A fully described process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    /// Send stdout and stderr here instead of inheriting ours.
    pub log_file: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            log_file: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `flag` followed by a path argument.
    pub fn path_arg(self, flag: &str, path: &Path) -> Self {
        self.arg(flag).arg(path.display().to_string())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    /// File name of the program, used to identify it in logs and fakes.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Value following `flag` in the argument list, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|idx| self.args.get(idx + 1))
            .map(String::as_str)
    }

    fn to_command(&self) -> Result<Command> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(path) = &self.log_file {
            let log = File::create(path)?;
            command.stdout(Stdio::from(log.try_clone()?));
            command.stderr(Stdio::from(log));
        }
        Ok(command)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dir) = &self.current_dir {
            write!(f, "cd {} && ", dir.display())?;
        }
        for (key, value) in &self.envs {
            write!(f, "{key}={value} ")?;
        }
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a process run to completion.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code, `None` when terminated by a signal.
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turn a non-zero exit into [`Error::ExternalTool`].
    pub fn check(self, tool: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::ExternalTool {
                tool: tool.to_string(),
                status: self.status,
                stderr: String::from_utf8_lossy(&self.stderr).trim().to_string(),
            })
        }
    }
}

/// A long-running child process owned by the orchestrator.
pub trait ChildProcess: Send {
    fn id(&self) -> u32;

    /// Non-blocking liveness check. `Ok(None)` while running, otherwise the
    /// exit code (`Some(None)` when killed by a signal).
    fn try_exit_code(&mut self) -> Result<Option<Option<i32>>>;

    /// Ask the process to shut down gracefully.
    fn terminate(&mut self) -> Result<()>;

    fn is_running(&mut self) -> bool {
        matches!(self.try_exit_code(), Ok(None))
    }
}

/// Spawns services and runs external tools.
pub trait ProcessLauncher: Send + Sync {
    /// Start a long-running process without waiting for it.
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ChildProcess>>;

    /// Run a process to completion and capture its output.
    fn run(&self, spec: &CommandSpec) -> Result<ToolOutput>;
}

/// Launches real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

impl ProcessLauncher for OsLauncher {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ChildProcess>> {
        let child = spec.to_command()?.spawn().map_err(|source| Error::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        Ok(Box::new(OsChild { child }))
    }

    fn run(&self, spec: &CommandSpec) -> Result<ToolOutput> {
        let mut command = spec.to_command()?;
        command.stdin(Stdio::null());
        let output = command.output().map_err(|source| Error::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        Ok(ToolOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

struct OsChild {
    child: Child,
}

impl ChildProcess for OsChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_exit_code(&mut self) -> Result<Option<Option<i32>>> {
        Ok(self.child.try_wait()?.map(|status| status.code()))
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> Result<()> {
        use nix::{
            sys::signal::{kill, Signal},
            unistd::Pid,
        };
        kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<()> {
        Ok(self.child.kill()?)
    }
}
