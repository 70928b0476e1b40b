//! Per-spawn options for sandboxed processes.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// How the launcher's standard streams are connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdioMode {
    /// Pipes the caller can collect with `take_stdio`.
    #[default]
    Piped,
    /// Share the host process's streams.
    Inherit,
    /// Connect all streams to `/dev/null`.
    Null,
}

/// Options for spawning a command in a session.
///
/// # Environment
///
/// By default the sandboxed process inherits the host's full environment.
/// That includes any secrets present in it. Setting variables with
/// [`with_env`](Self::with_env) or [`with_envs`](Self::with_envs) replaces the
/// inherited environment entirely; stripping secrets is the caller's job.
///
/// # Example
///
/// ```
/// use sandbox_sessions::sandbox::{SpawnOptions, StdioMode};
///
/// let options = SpawnOptions::default()
///     .with_working_dir("/sessions/s1/mounts/proj")
///     .with_env("PATH", "/usr/bin:/bin")
///     .with_stdio(StdioMode::Inherit);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Working directory inside the sandbox.
    pub working_dir: Option<PathBuf>,

    /// Replacement environment; `None` inherits the host environment.
    pub env: Option<BTreeMap<String, String>>,

    /// Standard stream handling.
    pub stdio: StdioMode,
}

impl SpawnOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the working directory inside the sandbox.
    #[must_use]
    pub fn with_working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(path.into());
        self
    }

    /// Adds a variable to the replacement environment.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Adds multiple variables to the replacement environment.
    #[must_use]
    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env = self.env.get_or_insert_with(BTreeMap::new);
        for (k, v) in vars {
            env.insert(k.into(), v.into());
        }
        self
    }

    /// Starts from an empty environment.
    #[must_use]
    pub fn with_empty_env(mut self) -> Self {
        self.env = Some(BTreeMap::new());
        self
    }

    /// Sets how standard streams are connected.
    #[must_use]
    pub fn with_stdio(mut self, stdio: StdioMode) -> Self {
        self.stdio = stdio;
        self
    }
}
