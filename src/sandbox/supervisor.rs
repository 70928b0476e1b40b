//! Spawning, tracking and reaping of sandboxed processes.
//!
//! The supervisor owns the OS-level child handles. Sessions only keep the
//! [`ProcessId`]s of their processes.
//!
//! # Exit tracking
//!
//! Exits are collected with a non-blocking `try_wait` whenever the supervisor
//! is queried. Once a process has exited its record stays queryable for the
//! configured grace period, so a caller that raced the exit still sees the
//! final status, and is purged afterwards.

use std::collections::HashMap;
use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use super::args::{HostLayout, build_args};
use super::config::{SpawnOptions, StdioMode};
use crate::error::LaunchError;
use crate::session::{Session, SessionConfig, SessionId};
use crate::system::process_alive;

/// Poll interval used while waiting for a process to exit.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Identifier of a sandboxed process, distinct from its OS pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(Uuid);

impl ProcessId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ProcessId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// How a sandboxed process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, if the launcher exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the launcher was killed by one.
    pub signal: Option<i32>,
    /// When the exit was observed.
    pub exited_at: DateTime<Utc>,
}

impl ProcessExit {
    fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
            exited_at: Utc::now(),
        }
    }

    /// Returns `true` if the process exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A process launched inside a session's sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxedProcess {
    /// Stable identifier, valid until the record is purged.
    pub id: ProcessId,
    /// Owning session.
    pub session_id: SessionId,
    /// Command run inside the sandbox.
    pub command: String,
    /// Arguments passed to the command.
    pub args: Vec<String>,
    /// OS pid of the launcher process.
    pub pid: u32,
    /// When the process was spawned.
    pub started_at: DateTime<Utc>,
    /// Set once the process has exited.
    pub exit: Option<ProcessExit>,
}

/// Piped standard streams handed back to the caller.
#[derive(Debug)]
pub struct ProcessStdio {
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

#[derive(Debug)]
struct ProcessEntry {
    record: SandboxedProcess,
    child: Child,
    killed: bool,
    exited: Option<Instant>,
}

impl ProcessEntry {
    /// Collects the exit status if the child has finished.
    fn poll(&mut self) {
        if self.record.exit.is_some() {
            return;
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                let exit = ProcessExit::from_status(status);
                debug!(
                    process_id = %self.record.id,
                    code = ?exit.code,
                    signal = ?exit.signal,
                    "Sandboxed process exited"
                );
                self.record.exit = Some(exit);
                self.exited = Some(Instant::now());
            }
            Ok(None) => {}
            Err(e) => warn!(process_id = %self.record.id, error = %e, "Failed to poll process"),
        }
    }
}

/// Launches commands through the sandbox launcher and tracks them.
#[derive(Debug)]
pub struct ProcessSupervisor {
    launcher: PathBuf,
    launcher_args: Vec<OsString>,
    host: HostLayout,
    grace_period: Duration,
    processes: HashMap<ProcessId, ProcessEntry>,
}

impl ProcessSupervisor {
    /// Creates a supervisor for the given launcher.
    #[must_use]
    pub fn new(launcher: impl Into<PathBuf>, host: HostLayout, grace_period: Duration) -> Self {
        Self {
            launcher: launcher.into(),
            launcher_args: Vec::new(),
            host,
            grace_period,
            processes: HashMap::new(),
        }
    }

    /// Creates a supervisor from session configuration, probing the host layout.
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        let mut supervisor = Self::new(
            &config.launcher_path,
            HostLayout::detect(&config.sandbox_prefix),
            config.exit_grace_period,
        );
        supervisor.launcher_args.clone_from(&config.launcher_args);
        supervisor
    }

    /// Returns the launcher binary path.
    #[must_use]
    pub fn launcher(&self) -> &Path {
        &self.launcher
    }

    /// Returns the host facts used for argument building.
    #[must_use]
    pub fn host_layout(&self) -> &HostLayout {
        &self.host
    }

    /// Returns `true` if the launcher binary exists.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.launcher.exists()
    }

    /// Returns the full argument vector the launcher would receive.
    #[must_use]
    pub fn launch_args(
        &self,
        session: &Session,
        command: &str,
        args: &[&str],
        options: &SpawnOptions,
    ) -> Vec<OsString> {
        let mut argv = self.launcher_args.clone();
        argv.extend(build_args(session, command, args, options, &self.host));
        argv
    }

    /// Launches `command` inside the session's sandbox.
    ///
    /// The sandbox view is built from the session's mounts as they are at
    /// this call. Nothing is registered unless the launcher started.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `LaunchError::InvalidCommand` if the command is empty
    /// - `LaunchError::LauncherMissing` if the launcher is not installed
    /// - `LaunchError::BindSourceMissing` if a mount's host path does not exist
    /// - `LaunchError::SpawnFailed` if the launcher cannot be started
    #[instrument(skip(self, session, args, options), fields(session_id = %session.id))]
    pub fn spawn(
        &mut self,
        session: &Session,
        command: &str,
        args: &[&str],
        options: &SpawnOptions,
    ) -> Result<SandboxedProcess, LaunchError> {
        if command.is_empty() {
            return Err(LaunchError::InvalidCommand(
                "command cannot be empty".to_string(),
            ));
        }

        if !self.is_available() {
            return Err(LaunchError::LauncherMissing {
                path: self.launcher.clone(),
            });
        }

        if let Some(mount) = session.mounts().find(|m| !m.host_path.exists()) {
            return Err(LaunchError::BindSourceMissing {
                name: mount.name.clone(),
                host_path: mount.host_path.clone(),
            });
        }

        self.reap();

        let argv = self.launch_args(session, command, args, options);
        trace!(?argv, "Launcher arguments");

        let mut cmd = Command::new(&self.launcher);
        cmd.args(&argv);

        let (stdin, stdout, stderr) = match options.stdio {
            StdioMode::Piped => (Stdio::piped(), Stdio::piped(), Stdio::piped()),
            StdioMode::Inherit => (Stdio::inherit(), Stdio::inherit(), Stdio::inherit()),
            StdioMode::Null => (Stdio::null(), Stdio::null(), Stdio::null()),
        };
        cmd.stdin(stdin).stdout(stdout).stderr(stderr);

        if let Some(env) = &options.env {
            cmd.env_clear();
            cmd.envs(env);
        }

        let child = cmd.spawn().map_err(|e| LaunchError::SpawnFailed {
            launcher: self.launcher.clone(),
            source: e,
        })?;

        let record = SandboxedProcess {
            id: ProcessId::new(),
            session_id: session.id.clone(),
            command: command.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            pid: child.id(),
            started_at: Utc::now(),
            exit: None,
        };

        debug!(process_id = %record.id, pid = record.pid, %command, "Spawned sandboxed process");

        self.processes.insert(
            record.id,
            ProcessEntry {
                record: record.clone(),
                child,
                killed: false,
                exited: None,
            },
        );

        Ok(record)
    }

    /// Collects exits and purges records whose grace period has elapsed.
    pub fn reap(&mut self) {
        for entry in self.processes.values_mut() {
            entry.poll();
        }

        let grace = self.grace_period;
        self.processes.retain(|id, entry| {
            let keep = entry.exited.is_none_or(|at| at.elapsed() < grace);
            if !keep {
                trace!(process_id = %id, "Purging exited process record");
            }
            keep
        });
    }

    /// Returns a snapshot of a process record.
    pub fn get(&mut self, id: &ProcessId) -> Option<SandboxedProcess> {
        self.reap();
        self.processes.get(id).map(|entry| entry.record.clone())
    }

    /// Returns `true` if a record for this id is still held.
    #[must_use]
    pub fn contains(&self, id: &ProcessId) -> bool {
        self.processes.contains_key(id)
    }

    /// Returns the number of records held, including exited ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Returns `true` if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Checks whether a process is running.
    ///
    /// True only if the id is known, the process was not terminated by the
    /// supervisor, no exit has been recorded, and the OS still reports the
    /// pid alive. The last check guards against stale records.
    pub fn is_running(&mut self, id: &ProcessId) -> bool {
        self.reap();

        let Some(entry) = self.processes.get(id) else {
            return false;
        };

        !entry.killed && entry.record.exit.is_none() && process_alive(entry.record.pid)
    }

    /// Returns snapshots of every held record for a session, oldest first.
    pub fn processes_for(&mut self, session_id: &str) -> Vec<SandboxedProcess> {
        self.reap();

        let mut records: Vec<_> = self
            .processes
            .values()
            .filter(|entry| entry.record.session_id == session_id)
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by_key(|r| r.started_at);
        records
    }

    /// Hands the caller the piped streams of a process.
    ///
    /// Returns `None` for unknown ids. Streams already taken, or not piped,
    /// come back as `None` fields.
    pub fn take_stdio(&mut self, id: &ProcessId) -> Option<ProcessStdio> {
        let entry = self.processes.get_mut(id)?;
        Some(ProcessStdio {
            stdin: entry.child.stdin.take(),
            stdout: entry.child.stdout.take(),
            stderr: entry.child.stderr.take(),
        })
    }

    /// Blocks until the process exits or `timeout` elapses.
    ///
    /// Returns `None` on timeout or for unknown ids.
    pub fn wait_for_exit(&mut self, id: &ProcessId, timeout: Duration) -> Option<ProcessExit> {
        let start = Instant::now();
        loop {
            let entry = self.processes.get_mut(id)?;
            entry.poll();
            if let Some(exit) = &entry.record.exit {
                return Some(exit.clone());
            }
            if start.elapsed() >= timeout {
                return None;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Sends `SIGTERM` to every live process of the session.
    ///
    /// Every targeted process is marked terminated, even if signaling fails.
    /// Failures are logged, never returned. Returns the number of processes
    /// that were signaled.
    #[instrument(skip(self))]
    pub fn terminate_all(&mut self, session_id: &str) -> usize {
        let mut signaled = 0;

        for entry in self.processes.values_mut() {
            if entry.record.session_id != session_id || entry.killed {
                continue;
            }

            entry.poll();
            entry.killed = true;
            if entry.record.exit.is_some() {
                continue;
            }

            let Ok(raw) = i32::try_from(entry.record.pid) else {
                continue;
            };

            match kill(Pid::from_raw(raw), Signal::SIGTERM) {
                Ok(()) => {
                    trace!(process_id = %entry.record.id, pid = raw, "Sent SIGTERM");
                    signaled += 1;
                }
                Err(Errno::ESRCH) => {
                    debug!(process_id = %entry.record.id, pid = raw, "Process already gone");
                }
                Err(e) => {
                    warn!(process_id = %entry.record.id, pid = raw, error = %e, "Failed to signal process");
                }
            }
        }

        debug!(signaled, "Session processes terminated");
        signaled
    }
}
