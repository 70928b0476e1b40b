//! Sandboxed execution through an external namespace launcher (bubblewrap).
//!
//! This module turns a session's mounts into a launcher policy and runs
//! commands under it:
//!
//! - [`add_mount`] / [`remove_mount`] maintain the named host-directory
//!   exposures of a session
//! - [`build_args`] renders the launcher argument vector
//! - [`ProcessSupervisor`] spawns the launcher and tracks the resulting
//!   processes until they exit
//!
//! Inside the sandbox the base OS is read-only, `/proc`, `/dev` and `/tmp` are
//! private, and a session's staging directory and mounts appear under
//! `/sessions/{id}/mnt`.

mod args;
mod config;
mod mounts;
mod supervisor;

pub use args::{
    HostLayout, ISOLATION_FLAGS, LIB64_DIR, MOUNTS_DIR_NAME, READ_ONLY_SYSTEM_DIRS, build_args,
};
pub use config::{SpawnOptions, StdioMode};
pub use mounts::{Mount, add_mount, list_mounts, remove_mount};
pub use supervisor::{
    ProcessExit, ProcessId, ProcessStdio, ProcessSupervisor, SandboxedProcess,
};
