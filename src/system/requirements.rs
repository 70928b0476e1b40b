//! Host capability report.
//!
//! Nothing here is fatal: a host without the launcher degrades to
//! "sandboxing unavailable" instead of refusing to start.

use std::fs;
use std::path::Path;

use tracing::debug;

use super::launcher::LauncherInfo;

/// Results of all host checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemReport {
    /// Kernel release string (e.g., "6.8.0-generic"), or "unknown".
    pub kernel_version: String,
    /// Parsed kernel (major, minor), when the release string parses.
    pub kernel: Option<(u32, u32)>,
    /// Whether unprivileged user namespaces appear to be enabled.
    pub user_namespaces: bool,
    /// The sandbox launcher, when installed.
    pub launcher: Option<LauncherInfo>,
}

impl SystemReport {
    /// Returns `true` if sessions can launch sandboxed processes.
    ///
    /// Only the launcher is required; setuid installs of bubblewrap work
    /// without unprivileged user namespaces.
    #[must_use]
    pub fn sandboxing_available(&self) -> bool {
        self.launcher.is_some()
    }
}

/// Runs every host check against the given launcher path.
#[must_use]
pub fn check_all(launcher_path: &Path) -> SystemReport {
    let kernel_version = kernel_release();
    let kernel = parse_kernel_version(&kernel_version);

    SystemReport {
        kernel,
        kernel_version,
        user_namespaces: check_user_namespaces(),
        launcher: LauncherInfo::detect(launcher_path),
    }
}

fn kernel_release() -> String {
    match nix::sys::utsname::uname() {
        Ok(uname) => uname.release().to_string_lossy().into_owned(),
        Err(e) => {
            debug!(error = %e, "uname failed");
            "unknown".to_string()
        }
    }
}

/// Parse kernel version string into (major, minor).
fn parse_kernel_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse::<u32>().ok()?;

    // Minor version might have suffix like "7-generic", extract just the number
    let minor = parts
        .next()?
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse::<u32>()
        .ok()?;

    Some((major, minor))
}

/// Checks unprivileged user namespaces are enabled.
///
/// Debian-style kernels expose `kernel.unprivileged_userns_clone`; every
/// kernel exposes `user.max_user_namespaces`, where 0 disables them. Missing
/// files are treated as enabled.
#[must_use]
pub fn check_user_namespaces() -> bool {
    let clone_allowed = read_sysctl(Path::new("/proc/sys/kernel/unprivileged_userns_clone"))
        .is_none_or(|value| value == 1);
    let max_namespaces = read_sysctl(Path::new("/proc/sys/user/max_user_namespaces"))
        .is_none_or(|value| value > 0);

    clone_allowed && max_namespaces
}

fn read_sysctl(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}
