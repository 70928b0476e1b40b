//! Session lifecycle management.
//!
//! This module provides the `SessionManager` type, the single entry point the
//! host application talks to. It owns every session and the process
//! supervisor, creates sessions on demand and tears them down.
//!
//! # Get-or-create
//!
//! `add_mount` and `spawn` create the session when it does not exist yet, so
//! callers never need a separate creation step. A session is registered only
//! after its whole on-disk layout exists.
//!
//! # Teardown
//!
//! Destroying a session stops its processes first, then removes its directory
//! tree. Teardown never fails: problems are logged and returned in a
//! [`TeardownReport`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, instrument, trace, warn};
use walkdir::WalkDir;

use crate::error::{Error, SessionError};
use crate::sandbox::{
    self, Mount, ProcessExit, ProcessId, ProcessStdio, ProcessSupervisor, SandboxedProcess,
    SpawnOptions,
};
use crate::session::{
    Session, SessionConfig, SessionDescriptor, SessionId, SessionPaths, TeardownReport,
    path_component_error,
};

/// A session manager shared between several owners.
pub type SharedSessionManager = Arc<Mutex<SessionManager>>;

/// Manages the lifecycle of sandbox sessions.
///
/// The `SessionManager` is responsible for:
/// - Creating sessions and their directory layout
/// - Registering and removing mounts
/// - Spawning and tracking sandboxed processes
/// - Destroying sessions and cleaning up leftovers
///
/// # Example
///
/// ```no_run
/// use sandbox_sessions::session::{SessionConfig, SessionManager};
///
/// let mut manager = SessionManager::new(SessionConfig::default());
///
/// let session = manager.get_or_create("build-42").unwrap();
/// println!("staging at {}", session.paths.mount_dir.display());
///
/// let report = manager.destroy_session("build-42");
/// assert!(report.existed);
/// ```
#[derive(Debug)]
pub struct SessionManager {
    config: SessionConfig,
    sessions: HashMap<SessionId, Session>,
    supervisor: ProcessSupervisor,
}

impl SessionManager {
    /// Creates a new `SessionManager` with the given configuration.
    ///
    /// Nothing is created on disk until the first session is.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let supervisor = ProcessSupervisor::from_config(&config);
        Self {
            config,
            sessions: HashMap::new(),
            supervisor,
        }
    }

    /// Wraps the manager for shared ownership.
    #[must_use]
    pub fn into_shared(self) -> SharedSessionManager {
        Arc::new(Mutex::new(self))
    }

    /// Returns a reference to the configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the process supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Returns the session with this id, creating it if needed.
    ///
    /// Creation builds the directory layout and writes the session descriptor
    /// before the session is registered. On failure, a directory tree created
    /// by this call is removed again; a pre-existing one is left untouched.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `SessionError::InvalidId` if the id is not a single path component
    /// - `SessionError::Filesystem` if the layout or descriptor cannot be written
    #[instrument(skip(self))]
    pub fn get_or_create(&mut self, id: &str) -> Result<&mut Session, SessionError> {
        session_entry(&mut self.sessions, &self.config.base_dir, id)
    }

    /// Same as [`get_or_create`](Self::get_or_create).
    ///
    /// # Errors
    ///
    /// See [`get_or_create`](Self::get_or_create).
    pub fn create_session(&mut self, id: &str) -> Result<&mut Session, SessionError> {
        self.get_or_create(id)
    }

    /// Looks up a session without creating it.
    #[must_use]
    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Returns the ids of all registered sessions, sorted.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Destroys a session: stops its processes, then removes its layout.
    ///
    /// Unknown ids are a no-op. Exposed host directories are never touched.
    #[instrument(skip(self))]
    pub fn destroy_session(&mut self, id: &str) -> TeardownReport {
        let Some(session) = self.sessions.get(id) else {
            trace!("Session not registered, nothing to destroy");
            return TeardownReport::default();
        };

        let mut report = TeardownReport {
            existed: true,
            ..TeardownReport::default()
        };

        report.terminated = self.supervisor.terminate_all(id);

        if let Err(e) = session.paths.cleanup() {
            report.warnings.push(format!(
                "failed to remove {}: {e}",
                session.paths.root.display()
            ));
        }

        self.sessions.remove(id);
        debug!(terminated = report.terminated, clean = report.is_clean(), "Session destroyed");
        report
    }

    /// Destroys every registered session.
    ///
    /// Returns the teardown reports keyed by session id.
    #[instrument(skip(self))]
    pub fn destroy_all(&mut self) -> Vec<(SessionId, TeardownReport)> {
        self.session_ids()
            .into_iter()
            .map(|id| {
                let report = self.destroy_session(&id);
                (id, report)
            })
            .collect()
    }

    /// Exposes a host directory in a session, creating the session if needed.
    ///
    /// Returns the staging path of the mount. See [`sandbox::add_mount`].
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the session cannot be created, the mount name
    /// is invalid, or the staging link cannot be created.
    #[instrument(skip(self, host_path), fields(host_path = %host_path.as_ref().display()))]
    pub fn add_mount(
        &mut self,
        id: &str,
        host_path: impl AsRef<Path>,
        name: Option<&str>,
    ) -> Result<PathBuf, SessionError> {
        let session = self.get_or_create(id)?;
        sandbox::add_mount(session, host_path.as_ref(), name)
    }

    /// Removes a mount. Returns `false` if the session or mount is unknown.
    #[instrument(skip(self))]
    pub fn remove_mount(&mut self, id: &str, name: &str) -> bool {
        self.sessions
            .get_mut(id)
            .is_some_and(|session| sandbox::remove_mount(session, name))
    }

    /// Lists a session's mounts ordered by name; empty for unknown sessions.
    #[must_use]
    pub fn list_mounts(&self, id: &str) -> Vec<Mount> {
        self.sessions
            .get(id)
            .map(sandbox::list_mounts)
            .unwrap_or_default()
    }

    /// Runs a command inside a session's sandbox, creating the session if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the session cannot be created and
    /// `Error::Launch` if the process cannot be launched.
    #[instrument(skip(self, args, options))]
    pub fn spawn(
        &mut self,
        id: &str,
        command: &str,
        args: &[&str],
        options: &SpawnOptions,
    ) -> Result<SandboxedProcess, Error> {
        // Created before spawning so that the staging directory exists to bind
        let session = session_entry(&mut self.sessions, &self.config.base_dir, id)?;
        let process = self.supervisor.spawn(session, command, args, options)?;

        let supervisor = &self.supervisor;
        session.processes.retain(|pid| supervisor.contains(pid));
        session.processes.insert(process.id);
        session.touch();

        Ok(process)
    }

    /// Returns the launcher argument vector `spawn` would use, without
    /// spawning anything.
    ///
    /// Returns `None` for unknown sessions.
    #[must_use]
    pub fn build_args(
        &self,
        id: &str,
        command: &str,
        args: &[&str],
        options: &SpawnOptions,
    ) -> Option<Vec<OsString>> {
        let session = self.sessions.get(id)?;
        Some(self.supervisor.launch_args(session, command, args, options))
    }

    /// Checks whether a sandboxed process is still running.
    pub fn is_process_running(&mut self, process_id: &ProcessId) -> bool {
        self.supervisor.is_running(process_id)
    }

    /// Returns a snapshot of a process record, if still held.
    pub fn process(&mut self, process_id: &ProcessId) -> Option<SandboxedProcess> {
        self.supervisor.get(process_id)
    }

    /// Returns the process records still held for a session, oldest first.
    pub fn session_processes(&mut self, id: &str) -> Vec<SandboxedProcess> {
        let processes = self.supervisor.processes_for(id);

        if let Some(session) = self.sessions.get_mut(id) {
            let supervisor = &self.supervisor;
            session.processes.retain(|pid| supervisor.contains(pid));
        }

        processes
    }

    /// Hands over the piped standard streams of a process.
    pub fn take_stdio(&mut self, process_id: &ProcessId) -> Option<ProcessStdio> {
        self.supervisor.take_stdio(process_id)
    }

    /// Blocks until a process exits or the timeout elapses.
    pub fn wait_for_exit(
        &mut self,
        process_id: &ProcessId,
        timeout: Duration,
    ) -> Option<ProcessExit> {
        self.supervisor.wait_for_exit(process_id, timeout)
    }

    /// Destroys sessions with no mount change or spawn for longer than
    /// `max_idle`.
    ///
    /// Returns the number of sessions destroyed.
    #[instrument(skip(self))]
    pub fn cleanup_idle(&mut self, max_idle: Duration) -> usize {
        let idle: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|session| session.idle_for() > max_idle)
            .map(|session| session.id.clone())
            .collect();

        for id in &idle {
            debug!(%id, "Destroying idle session");
            self.destroy_session(id);
        }

        debug!(cleaned_count = idle.len(), "Idle session cleanup complete");
        idle.len()
    }

    /// Removes session directories left behind by a previous run.
    ///
    /// Scans the base directory for session trees (directories holding a
    /// descriptor or a staging directory) that this manager does not own and
    /// removes them. Returns the number of trees removed.
    #[instrument(skip(self), fields(base_dir = %self.config.base_dir.display()))]
    pub fn cleanup_stale(&self) -> usize {
        let base_dir = &self.config.base_dir;
        if !base_dir.exists() {
            return 0;
        }

        let mut cleaned_count = 0;

        for entry in WalkDir::new(base_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
        {
            // Symlinks are reported as such, never as directories
            if !entry.file_type().is_dir() {
                continue;
            }

            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if self.sessions.contains_key(name) {
                continue;
            }

            let paths = SessionPaths::new(base_dir, name);
            if !paths.meta_file.exists() && !paths.mount_dir.exists() {
                trace!(%name, "Skipping directory that is not a session");
                continue;
            }

            debug!(%name, "Removing stale session layout");
            match paths.cleanup() {
                Ok(()) => cleaned_count += 1,
                Err(e) => warn!(%name, error = %e, "Failed to remove stale session"),
            }
        }

        debug!(cleaned_count, "Stale session cleanup complete");
        cleaned_count
    }
}

fn session_entry<'a>(
    sessions: &'a mut HashMap<SessionId, Session>,
    base_dir: &Path,
    id: &str,
) -> Result<&'a mut Session, SessionError> {
    match sessions.entry(id.to_string()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let session = create_session_layout(base_dir, id)?;
            debug!(root = %session.paths.root.display(), "Session created");
            Ok(entry.insert(session))
        }
    }
}

/// Creates the on-disk layout and descriptor for a new session.
///
/// On failure, a session root created by this call is removed again. A root
/// that already existed is left in place.
fn create_session_layout(base_dir: &Path, id: &str) -> Result<Session, SessionError> {
    if let Some(reason) = path_component_error(id) {
        return Err(SessionError::InvalidId {
            id: id.to_string(),
            reason: reason.to_string(),
        });
    }

    let paths = SessionPaths::new(base_dir, id);
    let session = Session::new(id, paths);
    let preexisting = session.paths.exists();

    let created = session.paths.create_directories().and_then(|()| {
        SessionDescriptor::new(id, session.created_at).save(&session.paths.meta_file)
    });

    if let Err(e) = created {
        if preexisting {
            warn!(%id, error = %e, "Session creation failed, keeping existing directory");
        } else {
            warn!(%id, error = %e, "Session creation failed, removing partial layout");
            // Already logged by cleanup
            let _ = session.paths.cleanup();
        }
        return Err(e.into());
    }

    trace!(%id, "Session layout and descriptor written");
    Ok(session)
}
