//! Adapter for hosts written against a VM-style guest interface.
//!
//! Such hosts expect a guest process id, a connection flag, and a way to
//! check whether a named process runs in the guest. [`VmCompatAdapter`]
//! answers those questions from a session instead of a virtual machine.

use std::sync::{MutexGuard, PoisonError};

use tracing::{debug, instrument};

use crate::session::{SessionId, SessionManager, SharedSessionManager};

/// Process name hosts use to probe the guest connection.
pub const HEARTBEAT_PROCESS: &str = "__heartbeat_ping__";

/// Presents one session as a connected VM guest.
#[derive(Debug)]
pub struct VmCompatAdapter {
    manager: SharedSessionManager,
    session_id: SessionId,
    connected: bool,
}

impl VmCompatAdapter {
    /// Creates a connected adapter for `session_id`.
    ///
    /// The session itself is created lazily by the first mount or spawn.
    #[must_use]
    pub fn new(manager: SharedSessionManager, session_id: impl Into<SessionId>) -> Self {
        Self {
            manager,
            session_id: session_id.into(),
            connected: true,
        }
    }

    /// Returns the session this adapter stands for.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Synthetic guest process id, stable for the session.
    #[must_use]
    pub fn vm_process_id(&self) -> String {
        format!("sandbox-{}", self.session_id)
    }

    /// Returns `true` until [`disconnect`](Self::disconnect) is called.
    #[must_use]
    pub fn is_guest_connected(&self) -> bool {
        self.connected
    }

    /// Checks whether a process matching `name` runs in the session.
    ///
    /// The heartbeat name reports the connection itself. Any other name
    /// matches a running process whose command or one of whose arguments
    /// contains it.
    pub fn is_process_running(&self, name: &str) -> bool {
        if name == HEARTBEAT_PROCESS {
            return self.connected;
        }
        if !self.connected {
            return false;
        }

        let mut manager = self.lock();
        manager
            .session_processes(&self.session_id)
            .into_iter()
            .filter(|process| {
                process.command.contains(name) || process.args.iter().any(|arg| arg.contains(name))
            })
            .any(|process| manager.is_process_running(&process.id))
    }

    /// Disconnects the guest and destroys the session.
    ///
    /// Disconnecting is terminal; calling it again only repeats the
    /// (idempotent) teardown.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub fn disconnect(&mut self) {
        self.connected = false;
        let report = self.lock().destroy_session(&self.session_id);
        debug!(existed = report.existed, terminated = report.terminated, "Guest disconnected");
    }

    fn lock(&self) -> MutexGuard<'_, SessionManager> {
        self.manager.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
