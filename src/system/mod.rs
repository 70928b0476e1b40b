//! Host probes.
//!
//! This module answers whether the host can run sandboxed sessions: where
//! the launcher lives, which version it is, and whether OS processes are
//! still alive.

mod launcher;
mod requirements;

pub use launcher::{
    DEFAULT_LAUNCHER, LauncherInfo, UNKNOWN_VERSION, probe_launcher, process_alive,
    resolve_launcher,
};
pub use requirements::{SystemReport, check_all, check_user_namespaces};
