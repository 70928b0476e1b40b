//! Filesystem layout for session storage.
//!
//! This module computes the per-session directory tree, creates it with the
//! right permissions and removes it again without following links.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::error::FilesystemError;

/// Permissions for the base directory and session root: owner only (0700).
const ROOT_PERMISSIONS: u32 = 0o700;

/// Permissions for directories the sandboxed process must traverse (0755).
const SHARED_PERMISSIONS: u32 = 0o755;

/// Name of the output area inside the staging directory.
pub const OUTPUTS_DIR_NAME: &str = "outputs";

/// Paths for a session's filesystem structure.
///
/// Each session has a dedicated directory structure:
///
/// ```text
/// {base_dir}/{session-id}/      # 0700
/// ├── mnt/                      # 0755, mount staging area
/// │   ├── outputs/              # 0755, output area
/// │   └── {mount-name} -> host  # discoverability links
/// ├── sandbox-root/             # 0755
/// └── session.json              # diagnostic descriptor
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    /// Root directory for this session.
    pub root: PathBuf,
    /// Mount staging directory, bound into the sandbox.
    pub mount_dir: PathBuf,
    /// Output area inside the staging directory.
    pub output_dir: PathBuf,
    /// Scratch root reserved for the sandbox.
    pub sandbox_root: PathBuf,
    /// Session descriptor JSON file.
    pub meta_file: PathBuf,
}

impl SessionPaths {
    /// Creates a new `SessionPaths` for the given base directory and session ID.
    ///
    /// This only computes the paths; it does not create any directories.
    /// Use `create_directories()` to actually create the directory structure.
    #[must_use]
    pub fn new(base_dir: &Path, session_id: &str) -> Self {
        let root = base_dir.join(session_id);
        let mount_dir = root.join("mnt");
        Self {
            output_dir: mount_dir.join(OUTPUTS_DIR_NAME),
            sandbox_root: root.join("sandbox-root"),
            meta_file: root.join("session.json"),
            mount_dir,
            root,
        }
    }

    /// Creates all required directories for this session.
    ///
    /// The base directory is created when missing. The session root is
    /// restricted to its owner; the staging, output and sandbox-root
    /// directories stay traversable. Safe to call when parts already exist.
    ///
    /// # Errors
    ///
    /// Returns `FilesystemError` if a directory cannot be created or its
    /// permissions cannot be set.
    pub fn create_directories(&self) -> Result<(), FilesystemError> {
        if let Some(base_dir) = self.root.parent() {
            ensure_base_dir(base_dir)?;
        }

        for (dir, mode) in [
            (&self.root, ROOT_PERMISSIONS),
            (&self.mount_dir, SHARED_PERMISSIONS),
            (&self.output_dir, SHARED_PERMISSIONS),
            (&self.sandbox_root, SHARED_PERMISSIONS),
        ] {
            ensure_dir_with_permissions(dir, mode)?;
        }

        trace!(root = %self.root.display(), "Session layout created");
        Ok(())
    }

    /// Removes all session directories and files.
    ///
    /// This performs a recursive removal of the session root directory.
    /// Symlinks in the staging area are removed, never followed, so exposed
    /// host directories are left untouched. A missing root is not an error.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if removal fails for any other reason. Callers
    /// treat this as a best-effort warning.
    pub fn cleanup(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                debug!(root = %self.root.display(), "Session layout removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(root = %self.root.display(), "Session layout already absent");
                Ok(())
            }
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Failed to remove session layout");
                Err(e)
            }
        }
    }

    /// Checks if this session's directory structure exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.root.exists()
    }
}

/// Returns the default base directory for session storage.
///
/// Uses `XDG_RUNTIME_DIR` if set, otherwise falls back to `/tmp/sandbox-sessions`.
#[must_use]
pub fn get_default_base_dir() -> PathBuf {
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir).join("sandbox-sessions");
        }
    }

    PathBuf::from("/tmp/sandbox-sessions")
}

/// Ensures the base directory exists with correct permissions.
///
/// An existing base directory keeps whatever permissions it already has.
///
/// # Errors
///
/// Returns `FilesystemError` if directory creation fails.
pub fn ensure_base_dir(base_dir: &Path) -> Result<(), FilesystemError> {
    if !base_dir.exists() {
        ensure_dir_with_permissions(base_dir, ROOT_PERMISSIONS)?;
    }
    Ok(())
}

/// Ensures a directory exists with the specified permissions.
fn ensure_dir_with_permissions(path: &Path, mode: u32) -> Result<(), FilesystemError> {
    fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        source: e,
    })?;

    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        FilesystemError::Permissions {
            path: path.to_path_buf(),
            source: e,
        }
    })
}
