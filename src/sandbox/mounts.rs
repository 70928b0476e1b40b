//! Named host-directory exposures within a session.
//!
//! Exposure is two-tiered:
//!
//! - **Discoverability**: registering a mount creates a symlink in the
//!   session's staging directory (`{session}/mnt/{name} -> host_path`), so
//!   tooling browsing the staging tree outside the sandbox can find it.
//! - **Isolation**: the authoritative exposure is the read-write bind that
//!   [`build_args`](super::build_args) emits for every mount at spawn time,
//!   at `{prefix}/{id}/mounts/{name}` inside the sandbox.
//!
//! Mount names are unique per session. Registering a name that is already
//! taken is a silent no-op that keeps the prior mapping. The staging link and
//! the registry always name the same host path: a link left behind by an
//! earlier manager is adopted as the prior mapping.

use std::fs;
use std::io;
use std::os::unix::fs as unix_fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, trace, warn};

use crate::error::{FilesystemError, SessionError};
use crate::session::{OUTPUTS_DIR_NAME, Session, path_component_error};

/// A named exposure of one host directory into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Unique name within the owning session.
    pub name: String,
    /// Directory on the host, as supplied by the caller.
    pub host_path: PathBuf,
    /// Staging entry inside the session's mount directory.
    pub mount_point: PathBuf,
    /// When the mount was registered.
    pub added_at: DateTime<Utc>,
}

/// Resolves the effective mount name: the hint, or the host path's base name.
fn resolve_name(host_path: &Path, name_hint: Option<&str>) -> Result<String, SessionError> {
    let name = match name_hint {
        Some(hint) => hint.to_string(),
        None => host_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    if let Some(reason) = path_component_error(&name) {
        return Err(SessionError::InvalidMountName {
            name,
            reason: reason.to_string(),
        });
    }

    if name == OUTPUTS_DIR_NAME {
        return Err(SessionError::InvalidMountName {
            name,
            reason: "reserved for the session output area".to_string(),
        });
    }

    Ok(name)
}

/// Registers a host directory with the session and returns its staging path.
///
/// The host path is not validated here; a missing directory is reported
/// when a process is launched.
///
/// # Errors
///
/// Returns `SessionError::InvalidMountName` if the effective name is not a
/// single path component, and `SessionError::Filesystem` if the staging
/// link cannot be created.
#[instrument(skip(session, host_path), fields(session_id = %session.id, host_path = %host_path.display()))]
pub fn add_mount(
    session: &mut Session,
    host_path: &Path,
    name_hint: Option<&str>,
) -> Result<PathBuf, SessionError> {
    let name = resolve_name(host_path, name_hint)?;
    let mount_point = session.paths.mount_dir.join(&name);

    let staged = fs::symlink_metadata(&mount_point).is_ok();

    let host_path = match session.mounts.get(&name) {
        Some(existing) => {
            debug!(%name, "Mount name already registered, keeping existing mount");
            if !staged {
                create_link(&existing.host_path, &mount_point)?;
            }
            None
        }
        None if staged => {
            let target = fs::read_link(&mount_point).map_err(|e| FilesystemError::Expose {
                host_path: host_path.to_path_buf(),
                mount_point: mount_point.clone(),
                source: e,
            })?;
            debug!(%name, target = %target.display(), "Adopting existing staging link");
            Some(target)
        }
        None => {
            create_link(host_path, &mount_point)?;
            Some(host_path.to_path_buf())
        }
    };

    if let Some(host_path) = host_path {
        session.mounts.insert(
            name.clone(),
            Mount {
                name,
                host_path,
                mount_point: mount_point.clone(),
                added_at: Utc::now(),
            },
        );
    }

    session.touch();
    Ok(mount_point)
}

fn create_link(host_path: &Path, mount_point: &Path) -> Result<(), SessionError> {
    unix_fs::symlink(host_path, mount_point).map_err(|e| FilesystemError::Expose {
        host_path: host_path.to_path_buf(),
        mount_point: mount_point.to_path_buf(),
        source: e,
    })?;
    trace!(mount_point = %mount_point.display(), "Created staging link");
    Ok(())
}

/// Removes a mount from the session.
///
/// Returns `true` if a mount with that name was registered. Failing to
/// unlink the staging entry is logged and otherwise ignored.
#[instrument(skip(session), fields(session_id = %session.id))]
pub fn remove_mount(session: &mut Session, name: &str) -> bool {
    let Some(mount) = session.mounts.remove(name) else {
        trace!("No such mount");
        return false;
    };

    match fs::remove_file(&mount.mount_point) {
        Ok(()) => trace!(mount_point = %mount.mount_point.display(), "Removed staging link"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            mount_point = %mount.mount_point.display(),
            error = %e,
            "Failed to remove staging link"
        ),
    }

    session.touch();
    debug!("Mount removed");
    true
}

/// Returns a snapshot of the session's mounts, ordered by name.
#[must_use]
pub fn list_mounts(session: &Session) -> Vec<Mount> {
    session.mounts().cloned().collect()
}
