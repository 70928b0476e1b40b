//! Launcher argument construction.
//!
//! Translates a session's mounts and the isolation policy into the argument
//! vector handed to the sandbox launcher (bubblewrap). The launcher applies
//! binds in order and resolves conflicting flags last-wins, so the vector is
//! always assembled in the same sequence:
//!
//! 1. read-only binds of the base OS
//! 2. fresh `/proc`, `/dev` and a private `/tmp`
//! 3. the session staging directory, at `{prefix}/{id}/mnt`
//! 4. one read-write bind per registered mount, at `{prefix}/{id}/mounts/{name}`
//! 5. isolation flags
//! 6. optional working directory
//! 7. `--`, then the command and its arguments as discrete tokens
//!
//! Mount binds never land inside the staging bind. The staging directory holds
//! a discovery symlink under each mount name, and bubblewrap refuses to mount
//! over a symlink whose absolute target does not exist in the new root.
//!
//! Building is pure: host facts are captured up front in a [`HostLayout`].

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::sandbox::SpawnOptions;
use crate::session::Session;

/// Host directories bound read-only into every sandbox.
pub const READ_ONLY_SYSTEM_DIRS: &[&str] = &["/usr", "/lib", "/bin", "/sbin"];

/// Bound read-only only on hosts that have it.
pub const LIB64_DIR: &str = "/lib64";

/// Directory under `{prefix}/{id}` that holds the per-mount binds.
pub const MOUNTS_DIR_NAME: &str = "mounts";

/// Isolation flags appended after all filesystem binds.
pub const ISOLATION_FLAGS: &[&str] = &["--unshare-pid", "--unshare-ipc", "--die-with-parent"];

/// Host facts needed to build launcher arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLayout {
    /// Whether `/lib64` exists on the host.
    pub has_lib64: bool,
    /// Directory inside the sandbox under which sessions appear.
    pub sandbox_prefix: PathBuf,
}

impl HostLayout {
    /// Probes the host once.
    #[must_use]
    pub fn detect(sandbox_prefix: impl Into<PathBuf>) -> Self {
        Self {
            has_lib64: Path::new(LIB64_DIR).exists(),
            sandbox_prefix: sandbox_prefix.into(),
        }
    }

    /// Path inside the sandbox where the session's staging directory appears.
    #[must_use]
    pub fn staging_path(&self, session_id: &str) -> PathBuf {
        self.sandbox_prefix.join(session_id).join("mnt")
    }

    /// Path inside the sandbox where a mount appears.
    ///
    /// A sibling of the staging path, never below it.
    #[must_use]
    pub fn mount_path(&self, session_id: &str, mount_name: &str) -> PathBuf {
        self.sandbox_prefix
            .join(session_id)
            .join(MOUNTS_DIR_NAME)
            .join(mount_name)
    }
}

fn push_bind(out: &mut Vec<OsString>, flag: &str, src: &OsStr, dest: &OsStr) {
    out.push(flag.into());
    out.push(src.to_os_string());
    out.push(dest.to_os_string());
}

/// Builds the launcher argument vector for running `command` in `session`.
///
/// The session's mount set is read as it is now; identical inputs always
/// produce identical output.
#[must_use]
pub fn build_args(
    session: &Session,
    command: &str,
    args: &[&str],
    options: &SpawnOptions,
    host: &HostLayout,
) -> Vec<OsString> {
    let mut out = Vec::new();

    for dir in READ_ONLY_SYSTEM_DIRS {
        push_bind(&mut out, "--ro-bind", OsStr::new(dir), OsStr::new(dir));
    }
    if host.has_lib64 {
        let lib64 = OsStr::new(LIB64_DIR);
        push_bind(&mut out, "--ro-bind", lib64, lib64);
    }

    for (flag, dest) in [("--proc", "/proc"), ("--dev", "/dev"), ("--tmpfs", "/tmp")] {
        out.push(flag.into());
        out.push(dest.into());
    }

    push_bind(
        &mut out,
        "--bind",
        session.paths.mount_dir.as_os_str(),
        host.staging_path(&session.id).as_os_str(),
    );

    for mount in session.mounts() {
        push_bind(
            &mut out,
            "--bind",
            mount.host_path.as_os_str(),
            host.mount_path(&session.id, &mount.name).as_os_str(),
        );
    }

    out.extend(ISOLATION_FLAGS.iter().map(OsString::from));

    if let Some(dir) = &options.working_dir {
        out.push("--chdir".into());
        out.push(dir.as_os_str().to_os_string());
    }

    out.push("--".into());
    out.push(command.into());
    out.extend(args.iter().map(OsString::from));

    out
}
