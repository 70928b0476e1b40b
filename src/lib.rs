//! Sandbox Sessions - namespace-based sandbox session manager.
//!
//! This crate isolates a host directory tree and the processes spawned in it
//! using an external namespace launcher (bubblewrap). A host application
//! creates sessions, exposes host directories into them, runs commands inside
//! them, and tears them down again.
//!
//! # Platform Requirements
//!
//! - Linux with bubblewrap (`bwrap`) installed
//! - Unprivileged user namespaces enabled, unless `bwrap` is installed setuid
//!
//! A host without the launcher still manages sessions; only spawning fails.
//!
//! # Example
//!
//! ```no_run
//! use sandbox_sessions::sandbox::SpawnOptions;
//! use sandbox_sessions::session::{SessionConfig, SessionManager};
//! use std::time::Duration;
//!
//! fn main() -> miette::Result<()> {
//!     let mut manager = SessionManager::new(SessionConfig::default());
//!
//!     manager.add_mount("demo", "/home/u/project", Some("proj"))?;
//!     let process = manager.spawn(
//!         "demo",
//!         "ls",
//!         &["/sessions/demo/mounts/proj"],
//!         &SpawnOptions::default(),
//!     )?;
//!
//!     let exit = manager.wait_for_exit(&process.id, Duration::from_secs(5));
//!     println!("exited: {exit:?}");
//!
//!     manager.destroy_session("demo");
//!     Ok(())
//! }
//! ```

pub mod compat;
pub mod error;
pub mod sandbox;
pub mod session;
pub mod system;

// Re-export commonly used types
pub use compat::VmCompatAdapter;
pub use error::{Error, Result};
pub use sandbox::{ProcessId, SandboxedProcess, SpawnOptions, StdioMode};
pub use session::{SessionConfig, SessionManager, SharedSessionManager, TeardownReport};
