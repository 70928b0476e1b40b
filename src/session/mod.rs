//! Session management for sandboxed workspaces.
//!
//! A session is an isolated working context: a private directory tree on the
//! host, a set of named host-directory exposures (mounts), and the processes
//! spawned inside it through the sandbox launcher.
//!
//! # Storage Layout
//!
//! Sessions are stored under the configured base directory
//! (`$XDG_RUNTIME_DIR/sandbox-sessions/` or `/tmp/sandbox-sessions/`):
//!
//! ```text
//! sandbox-sessions/
//! └── {session-id}/
//!     ├── mnt/            # mount staging area (bound into the sandbox)
//!     │   └── outputs/    # output area
//!     ├── sandbox-root/
//!     └── session.json    # diagnostic descriptor
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sandbox_sessions::session::{SessionConfig, SessionManager};
//! use sandbox_sessions::sandbox::SpawnOptions;
//!
//! let mut manager = SessionManager::new(SessionConfig::default());
//!
//! manager.add_mount("s1", "/home/u/project", Some("proj")).unwrap();
//! let process = manager
//!     .spawn("s1", "ls", &["/sessions/s1/mounts/proj"], &SpawnOptions::default())
//!     .unwrap();
//! println!("spawned {} as pid {}", process.id, process.pid);
//!
//! // Stops processes, then removes the session tree
//! manager.destroy_session("s1");
//! ```

mod lifecycle;
mod meta;
mod storage;

pub use lifecycle::{SessionManager, SharedSessionManager};
pub use meta::{PLATFORM_TAG, SessionDescriptor};
pub use storage::{OUTPUTS_DIR_NAME, SessionPaths, get_default_base_dir};

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::sandbox::{Mount, ProcessId};
use crate::system::resolve_launcher;

/// Caller-supplied session identifier.
pub type SessionId = String;

/// An isolated session with its own directory tree, mounts and processes.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Filesystem paths for this session.
    pub paths: SessionPaths,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last mount change or spawn.
    pub last_activity: DateTime<Utc>,
    pub(crate) mounts: BTreeMap<String, Mount>,
    pub(crate) processes: BTreeSet<ProcessId>,
}

impl Session {
    /// Creates the in-memory record for a session.
    ///
    /// This does not touch the filesystem; `SessionManager` creates the
    /// layout before registering a session.
    #[must_use]
    pub fn new(id: impl Into<SessionId>, paths: SessionPaths) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            paths,
            created_at: now,
            last_activity: now,
            mounts: BTreeMap::new(),
            processes: BTreeSet::new(),
        }
    }

    /// Records activity on the session.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Returns the registered mounts ordered by name.
    pub fn mounts(&self) -> impl Iterator<Item = &Mount> {
        self.mounts.values()
    }

    /// Looks up a mount by name.
    #[must_use]
    pub fn mount(&self, name: &str) -> Option<&Mount> {
        self.mounts.get(name)
    }

    /// Returns the ids of processes spawned in this session.
    pub fn process_ids(&self) -> impl Iterator<Item = &ProcessId> {
        self.processes.iter()
    }

    /// Returns how long the session has been idle.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        (Utc::now() - self.last_activity)
            .to_std()
            .unwrap_or_default()
    }
}

/// Outcome of destroying a session.
///
/// Teardown is best-effort and never fails; anything that went wrong is
/// recorded here after being logged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Whether a session with the requested id existed.
    pub existed: bool,
    /// Number of processes that were sent `SIGTERM`.
    pub terminated: usize,
    /// Non-fatal problems encountered during teardown.
    pub warnings: Vec<String>,
}

impl TeardownReport {
    /// Returns `true` if teardown completed without warnings.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Configuration for session management.
///
/// # Example
///
/// ```
/// use sandbox_sessions::session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::default()
///     .with_base_dir("/tmp/my-sessions")
///     .with_launcher_path("/usr/bin/bwrap")
///     .with_exit_grace_period(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base directory for session storage.
    pub base_dir: PathBuf,

    /// Path of the sandbox launcher binary.
    pub launcher_path: PathBuf,

    /// Extra arguments placed before the generated launcher policy.
    ///
    /// The generated policy comes later, so it wins any conflict.
    pub launcher_args: Vec<OsString>,

    /// Directory inside the sandbox under which sessions are exposed.
    ///
    /// Defaults to `/sessions`.
    pub sandbox_prefix: PathBuf,

    /// How long an exited process stays queryable before it is purged.
    ///
    /// Defaults to 5 seconds.
    pub exit_grace_period: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_dir: storage::get_default_base_dir(),
            launcher_path: resolve_launcher(),
            launcher_args: Vec::new(),
            sandbox_prefix: PathBuf::from("/sessions"),
            exit_grace_period: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base directory for session storage.
    #[must_use]
    pub fn with_base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_dir = path.into();
        self
    }

    /// Sets the sandbox launcher binary.
    #[must_use]
    pub fn with_launcher_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.launcher_path = path.into();
        self
    }

    /// Sets extra leading launcher arguments.
    #[must_use]
    pub fn with_launcher_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.launcher_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the in-sandbox directory under which sessions are exposed.
    #[must_use]
    pub fn with_sandbox_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.sandbox_prefix = prefix.into();
        self
    }

    /// Sets how long exited processes remain queryable.
    #[must_use]
    pub fn with_exit_grace_period(mut self, grace: Duration) -> Self {
        self.exit_grace_period = grace;
        self
    }
}

/// Checks that `value` can be used as a single path component.
///
/// Returns the reason it cannot.
pub(crate) fn path_component_error(value: &str) -> Option<&'static str> {
    if value.is_empty() {
        Some("must not be empty")
    } else if value == "." || value == ".." {
        Some("must not be a relative path marker")
    } else if value.contains('/') {
        Some("must not contain '/'")
    } else if value.contains('\0') {
        Some("must not contain NUL")
    } else {
        None
    }
}
