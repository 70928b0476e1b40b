//! Error types for the sandbox session manager.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.
//!
//! Creation failures (session layout, process launch) are surfaced through these
//! types. Teardown never fails: problems found while destroying a session are
//! logged and collected in a [`TeardownReport`](crate::session::TeardownReport).

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the crate.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Session creation or mount registration failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),

    /// Sandboxed process could not be launched
    #[error(transparent)]
    #[diagnostic(transparent)]
    Launch(#[from] LaunchError),
}

/// Errors raised while creating session state on disk.
#[derive(Error, Debug, Diagnostic)]
pub enum FilesystemError {
    /// A directory of the session layout could not be created
    #[error("failed to create directory: {}", path.display())]
    #[diagnostic(
        code(ssm::fs::create_dir),
        help("Check that the session base directory is writable by this user")
    )]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Permissions could not be applied to a layout directory
    #[error("failed to set permissions on: {}", path.display())]
    #[diagnostic(code(ssm::fs::permissions))]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The session descriptor could not be written
    #[error("failed to write session descriptor: {}", path.display())]
    #[diagnostic(code(ssm::fs::descriptor))]
    Descriptor {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The discoverability link for a mount could not be created
    #[error("failed to expose {} at {}", host_path.display(), mount_point.display())]
    #[diagnostic(code(ssm::fs::expose))]
    Expose {
        host_path: PathBuf,
        mount_point: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors related to sessions and their mount registry.
#[derive(Error, Debug, Diagnostic)]
pub enum SessionError {
    /// Session id cannot be used as a directory name
    #[error("invalid session id {id:?}: {reason}")]
    #[diagnostic(
        code(ssm::session::invalid_id),
        help("Session ids must be a single non-empty path component")
    )]
    InvalidId { id: String, reason: String },

    /// Mount name cannot be used inside the staging directory
    #[error("invalid mount name {name:?}: {reason}")]
    #[diagnostic(code(ssm::session::invalid_mount_name))]
    InvalidMountName { name: String, reason: String },

    /// Filesystem layout failure
    #[error(transparent)]
    #[diagnostic(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Errors raised when a sandboxed process cannot be started.
#[derive(Error, Debug, Diagnostic)]
pub enum LaunchError {
    /// The sandbox launcher binary is not installed
    #[error("sandbox launcher not found at {}", path.display())]
    #[diagnostic(
        code(ssm::launch::missing),
        help("Install bubblewrap (package `bubblewrap`) or configure the launcher path")
    )]
    LauncherMissing { path: PathBuf },

    /// Command was empty or otherwise unusable
    #[error("invalid command: {0}")]
    #[diagnostic(code(ssm::launch::invalid_command))]
    InvalidCommand(String),

    /// A registered mount points at a host path that does not exist
    #[error("cannot bind mount {name:?}: host path {} does not exist", host_path.display())]
    #[diagnostic(code(ssm::launch::bind_source))]
    BindSourceMissing { name: String, host_path: PathBuf },

    /// The launcher process could not be spawned
    #[error("failed to spawn sandbox launcher {}", launcher.display())]
    #[diagnostic(code(ssm::launch::spawn))]
    SpawnFailed {
        launcher: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
