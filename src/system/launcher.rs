//! Sandbox launcher discovery and OS-level process probes.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, trace};

/// Default location of the bubblewrap launcher.
pub const DEFAULT_LAUNCHER: &str = "/usr/bin/bwrap";

const LAUNCHER_NAME: &str = "bwrap";

/// Canonical locations searched when the default launcher is absent.
///
/// Host `$PATH` is not consulted.
const LAUNCHER_SEARCH_DIRS: &[&str] = &["/usr/bin", "/bin", "/usr/local/bin"];

/// Reported when the launcher exists but cannot tell its version.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Presence and version of the sandbox launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherInfo {
    /// Path of the launcher binary.
    pub path: PathBuf,
    /// Trimmed `--version` output, or `"unknown"`.
    pub version: String,
}

impl LauncherInfo {
    /// Checks whether the launcher is installed and asks it for its version.
    ///
    /// Returns `None` when the binary does not exist, which callers treat as
    /// "sandboxing unavailable".
    #[must_use]
    pub fn detect(path: &Path) -> Option<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Sandbox launcher not found");
            return None;
        }

        let version = Command::new(path)
            .arg("--version")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()
            .filter(|output| output.status.success())
            .map_or_else(|| UNKNOWN_VERSION.to_string(), |o| parse_version(&o.stdout));

        trace!(path = %path.display(), %version, "Sandbox launcher detected");
        Some(Self {
            path: path.to_path_buf(),
            version,
        })
    }
}

/// Asynchronous variant of [`LauncherInfo::detect`].
pub async fn probe_launcher(path: &Path) -> Option<LauncherInfo> {
    if !path.exists() {
        debug!(path = %path.display(), "Sandbox launcher not found");
        return None;
    }

    let output = tokio::process::Command::new(path)
        .arg("--version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;

    let version = match output {
        Ok(output) if output.status.success() => parse_version(&output.stdout),
        Ok(output) => {
            debug!(status = %output.status, "Launcher --version exited unsuccessfully");
            UNKNOWN_VERSION.to_string()
        }
        Err(e) => {
            debug!(error = %e, "Failed to run launcher --version");
            UNKNOWN_VERSION.to_string()
        }
    };

    Some(LauncherInfo {
        path: path.to_path_buf(),
        version,
    })
}

fn parse_version(stdout: &[u8]) -> String {
    let version = String::from_utf8_lossy(stdout).trim().to_string();
    if version.is_empty() {
        UNKNOWN_VERSION.to_string()
    } else {
        version
    }
}

/// Picks the launcher binary: the default path, else the first match in the
/// canonical system directories, else the default path anyway so that the
/// failure is reported against a predictable location.
#[must_use]
pub fn resolve_launcher() -> PathBuf {
    let default = PathBuf::from(DEFAULT_LAUNCHER);
    if default.exists() {
        return default;
    }

    LAUNCHER_SEARCH_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(LAUNCHER_NAME))
        .find(|candidate| candidate.exists())
        .unwrap_or(default)
}

/// Checks whether an OS process with the given pid is alive.
///
/// Sends the null signal: `ESRCH` means gone, `EPERM` means the process
/// exists but belongs to someone else.
#[cfg(unix)]
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
#[must_use]
pub fn process_alive(_pid: u32) -> bool {
    // No null-signal probe here; exit status from the child handle decides
    true
}
