//! Integration tests for sandboxed process execution.
//!
//! Most tests run against a `/bin/sh` stand-in for the launcher that skips
//! the policy arguments and executes whatever follows `--`, so process
//! supervision is covered on any Unix host.
//!
//! Tests in the "Isolation" section need a working bubblewrap. They skip
//! themselves (with a note on stderr) when it is missing or cannot create
//! namespaces on this host.

use std::fs;
use std::io::Read;
use std::time::Duration;

use sandbox_sessions::error::{Error, LaunchError};
use sandbox_sessions::sandbox::{ProcessId, SpawnOptions};
use sandbox_sessions::session::{SessionConfig, SessionManager};
use tempfile::TempDir;

/// Runs everything after the first `--`, ignoring the policy before it.
const FAKE_LAUNCHER: &str = r#"while [ "$#" -gt 0 ]; do if [ "$1" = "--" ]; then shift; exec "$@"; fi; shift; done; exit 127"#;

/// Prints every argument it receives, one per line.
const ECHO_LAUNCHER: &str = r#"printf '%s\n' "$@""#;

const EXIT_TIMEOUT: Duration = Duration::from_secs(10);

fn shell_manager(temp: &TempDir, script: &str) -> SessionManager {
    let config = SessionConfig::default()
        .with_base_dir(temp.path().join("sessions"))
        .with_launcher_path("/bin/sh")
        .with_launcher_args(["-c", script, "fake-bwrap"]);
    SessionManager::new(config)
}

fn fake_manager(temp: &TempDir) -> SessionManager {
    shell_manager(temp, FAKE_LAUNCHER)
}

/// Output of a finished sandboxed process.
struct Finished {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

/// Collects a piped process's output and waits for it to exit.
fn finish(manager: &mut SessionManager, id: &ProcessId) -> Finished {
    let stdio = manager.take_stdio(id).expect("unknown process");
    drop(stdio.stdin);

    let mut stdout = String::new();
    if let Some(mut out) = stdio.stdout {
        out.read_to_string(&mut stdout).expect("failed to read stdout");
    }
    let mut stderr = String::new();
    if let Some(mut err) = stdio.stderr {
        err.read_to_string(&mut stderr).expect("failed to read stderr");
    }

    let exit = manager
        .wait_for_exit(id, EXIT_TIMEOUT)
        .expect("process did not exit in time");

    Finished {
        code: exit.code,
        stdout,
        stderr,
    }
}

fn run(manager: &mut SessionManager, session: &str, command: &str, args: &[&str]) -> Finished {
    let process = manager
        .spawn(session, command, args, &SpawnOptions::default())
        .expect("spawn failed");
    finish(manager, &process.id)
}

fn assert_success(output: &Finished, context: &str) {
    assert_eq!(
        output.code,
        Some(0),
        "{} failed.\nstdout:\n{}\nstderr:\n{}",
        context,
        output.stdout,
        output.stderr
    );
}

// =============================================================================
// Supervision Tests
// =============================================================================

#[test]
fn test_echo_hello() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let mut manager = fake_manager(&temp);

    let output = run(&mut manager, "s1", "echo", &["hello"]);

    assert_success(&output, "echo");
    assert_eq!(output.stdout.trim(), "hello");
}

#[test]
fn test_command_failure_exit_code() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let mut manager = fake_manager(&temp);

    let output = run(&mut manager, "s1", "sh", &["-c", "echo oops >&2; exit 42"]);

    assert_eq!(output.code, Some(42));
    assert_eq!(output.stderr.trim(), "oops");
}

#[test]
fn test_arguments_stay_discrete() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let mut manager = fake_manager(&temp);

    let output = run(
        &mut manager,
        "s1",
        "printf",
        &["[%s]\n", "two words", "$HOME", "; rm -rf /"],
    );

    assert_success(&output, "printf");
    assert_eq!(output.stdout, "[two words]\n[$HOME]\n[; rm -rf /]\n");
}

#[test]
fn test_spawn_records_process() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let mut manager = fake_manager(&temp);

    let process = manager
        .spawn("s1", "sleep", &["30"], &SpawnOptions::default())
        .expect("spawn failed");

    assert_eq!(process.session_id, "s1");
    assert_eq!(process.command, "sleep");
    assert_eq!(process.args, vec!["30"]);
    assert!(process.pid > 0);
    assert!(manager.is_process_running(&process.id));

    let processes = manager.session_processes("s1");
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].id, process.id);
    assert!(
        manager
            .session("s1")
            .expect("session missing")
            .process_ids()
            .any(|id| *id == process.id)
    );

    manager.destroy_session("s1");
}

#[test]
fn test_destroy_terminates_processes() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let mut manager = fake_manager(&temp);

    let first = manager
        .spawn("s1", "sleep", &["30"], &SpawnOptions::default())
        .expect("spawn failed");
    let second = manager
        .spawn("s1", "sleep", &["30"], &SpawnOptions::default())
        .expect("spawn failed");
    let root = manager.session("s1").expect("session missing").paths.root.clone();

    let report = manager.destroy_session("s1");

    assert!(report.existed);
    assert_eq!(report.terminated, 2);
    assert!(report.is_clean(), "warnings: {:?}", report.warnings);
    assert!(!manager.is_process_running(&first.id));
    assert!(!manager.is_process_running(&second.id));
    assert!(!root.exists());

    let exit = manager
        .wait_for_exit(&first.id, EXIT_TIMEOUT)
        .expect("process survived SIGTERM");
    assert_eq!(exit.signal, Some(15));
}

#[test]
fn test_destroy_leaves_other_sessions_running() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let mut manager = fake_manager(&temp);

    let doomed = manager
        .spawn("doomed", "sleep", &["30"], &SpawnOptions::default())
        .expect("spawn failed");
    let survivor = manager
        .spawn("survivor", "sleep", &["30"], &SpawnOptions::default())
        .expect("spawn failed");

    manager.destroy_session("doomed");

    assert!(!manager.is_process_running(&doomed.id));
    assert!(manager.is_process_running(&survivor.id));

    manager.destroy_session("survivor");
}

#[test]
fn test_exited_process_not_running() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let mut manager = fake_manager(&temp);

    let process = manager
        .spawn("s1", "true", &[], &SpawnOptions::default())
        .expect("spawn failed");
    let exit = manager
        .wait_for_exit(&process.id, EXIT_TIMEOUT)
        .expect("process did not exit");

    assert!(exit.success());
    assert!(!manager.is_process_running(&process.id));
}

#[test]
fn test_exit_record_purged_after_grace_period() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let config = SessionConfig::default()
        .with_base_dir(temp.path().join("sessions"))
        .with_launcher_path("/bin/sh")
        .with_launcher_args(["-c", FAKE_LAUNCHER, "fake-bwrap"])
        .with_exit_grace_period(Duration::from_millis(50));
    let mut manager = SessionManager::new(config);

    let process = manager
        .spawn("s1", "true", &[], &SpawnOptions::default())
        .expect("spawn failed");
    manager
        .wait_for_exit(&process.id, EXIT_TIMEOUT)
        .expect("process did not exit");
    assert!(manager.process(&process.id).is_some());

    std::thread::sleep(Duration::from_millis(150));

    assert!(manager.process(&process.id).is_none());
    assert!(manager.session_processes("s1").is_empty());
    assert_eq!(
        manager
            .session("s1")
            .expect("session missing")
            .process_ids()
            .count(),
        0
    );
}

#[test]
fn test_environment_replacement() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let mut manager = fake_manager(&temp);
    let options = SpawnOptions::default()
        .with_env("PATH", "/usr/bin:/bin")
        .with_env("SANDBOX_MARKER", "present");

    let process = manager
        .spawn("s1", "env", &[], &options)
        .expect("spawn failed");
    let output = finish(&mut manager, &process.id);

    assert_success(&output, "env");
    assert!(output.stdout.contains("SANDBOX_MARKER=present"));
    assert!(!output.stdout.contains("HOME="), "host env leaked:\n{}", output.stdout);
}

// =============================================================================
// Launch Failure Tests
// =============================================================================

#[test]
fn test_empty_command_rejected() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let mut manager = fake_manager(&temp);

    let result = manager.spawn("s1", "", &[], &SpawnOptions::default());

    assert!(matches!(
        result,
        Err(Error::Launch(LaunchError::InvalidCommand(_)))
    ));
    assert!(manager.session_processes("s1").is_empty());
}

#[test]
fn test_missing_bind_source_registers_nothing() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let mut manager = fake_manager(&temp);
    let missing = temp.path().join("does-not-exist");

    manager
        .add_mount("s1", &missing, Some("gone"))
        .expect("registration does not validate the host path");

    let result = manager.spawn("s1", "true", &[], &SpawnOptions::default());

    match result {
        Err(Error::Launch(LaunchError::BindSourceMissing { name, host_path })) => {
            assert_eq!(name, "gone");
            assert_eq!(host_path, missing);
        }
        other => panic!("expected BindSourceMissing, got {other:?}"),
    }
    assert!(manager.session_processes("s1").is_empty());
}

#[test]
fn test_missing_launcher() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let config = SessionConfig::default()
        .with_base_dir(temp.path().join("sessions"))
        .with_launcher_path(temp.path().join("no-bwrap"));
    let mut manager = SessionManager::new(config);

    let result = manager.spawn("s1", "true", &[], &SpawnOptions::default());

    assert!(matches!(
        result,
        Err(Error::Launch(LaunchError::LauncherMissing { .. }))
    ));
}

// =============================================================================
// Launcher Invocation Tests
// =============================================================================

#[test]
fn test_launcher_receives_policy() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let host = temp.path().join("project");
    fs::create_dir(&host).expect("failed to create host dir");
    let mut manager = shell_manager(&temp, ECHO_LAUNCHER);
    manager.add_mount("s1", &host, Some("proj")).expect("add failed");

    let output = run(&mut manager, "s1", "ls", &["-la"]);
    assert_success(&output, "echo launcher");

    let argv: Vec<&str> = output.stdout.lines().collect();
    let host_str = host.to_string_lossy();
    let bind = argv
        .iter()
        .position(|a| *a == host_str)
        .expect("mount not bound");

    assert_eq!(argv[bind - 1], "--bind");
    assert_eq!(argv[bind + 1], "/sessions/s1/mounts/proj");
    assert!(argv.contains(&"--unshare-pid"));
    assert_eq!(&argv[argv.len() - 3..], &["--", "ls", "-la"]);
}

#[test]
fn test_dry_run_matches_invocation() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let mut manager = shell_manager(&temp, ECHO_LAUNCHER);
    manager.get_or_create("s1").expect("create failed");

    let planned = manager
        .build_args("s1", "id", &[], &SpawnOptions::default())
        .expect("session missing");
    let output = run(&mut manager, "s1", "id", &[]);

    // The shell consumes the `-c SCRIPT NAME` prefix
    let planned: Vec<String> = planned[3..]
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    let received: Vec<String> = output.stdout.lines().map(str::to_string).collect();
    assert_eq!(planned, received);
}

// =============================================================================
// Isolation Tests (real bubblewrap)
// =============================================================================

/// Returns a manager using the real launcher, or `None` when it cannot run.
fn real_manager(temp: &TempDir) -> Option<SessionManager> {
    let config = SessionConfig::default().with_base_dir(temp.path().join("sessions"));
    let mut manager = SessionManager::new(config);

    if !manager.supervisor().is_available() {
        eprintln!("skipping: bubblewrap not installed");
        return None;
    }

    let probe = manager
        .spawn("probe", "true", &[], &SpawnOptions::default())
        .ok()?;
    let output = finish(&mut manager, &probe.id);
    manager.destroy_session("probe");

    if output.code == Some(0) {
        Some(manager)
    } else {
        eprintln!("skipping: bubblewrap unusable here: {}", output.stderr.trim());
        None
    }
}

#[test]
fn test_pid_namespace_isolation() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let Some(mut manager) = real_manager(&temp) else {
        return;
    };

    let output = run(&mut manager, "s1", "cat", &["/proc/self/status"]);
    assert_success(&output, "cat /proc/self/status");

    // NSpid lists one pid per namespace level
    let levels = output
        .stdout
        .lines()
        .find(|line| line.starts_with("NSpid:"))
        .map(|line| line.split_whitespace().count() - 1)
        .expect("NSpid line missing");
    assert!(levels >= 2, "process not in a nested PID namespace");
}

#[test]
fn test_mount_visible_and_writable() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let Some(mut manager) = real_manager(&temp) else {
        return;
    };
    let host = temp.path().join("project");
    fs::create_dir(&host).expect("failed to create host dir");
    fs::write(host.join("hello.txt"), "from host").expect("failed to write file");
    manager.add_mount("s1", &host, Some("proj")).expect("add failed");

    let output = run(&mut manager, "s1", "cat", &["/sessions/s1/mounts/proj/hello.txt"]);
    assert_success(&output, "cat mounted file");
    assert_eq!(output.stdout, "from host");

    let output = run(
        &mut manager,
        "s1",
        "sh",
        &["-c", "echo from sandbox > /sessions/s1/mounts/proj/new.txt"],
    );
    assert_success(&output, "write through mount");
    assert_eq!(
        fs::read_to_string(host.join("new.txt")).expect("write not visible on host"),
        "from sandbox\n"
    );

    manager.destroy_session("s1");
    assert!(host.join("hello.txt").exists());
}

#[test]
fn test_unmounted_host_paths_hidden() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let Some(mut manager) = real_manager(&temp) else {
        return;
    };
    let secret = temp.path().join("secret.txt");
    fs::write(&secret, "hidden").expect("failed to write file");
    let secret = secret.to_string_lossy().into_owned();

    let output = run(&mut manager, "s1", "test", &["-e", &secret]);

    assert_eq!(output.code, Some(1), "{secret} visible inside the sandbox");
}

#[test]
fn test_removed_mount_hidden_from_later_spawns() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let Some(mut manager) = real_manager(&temp) else {
        return;
    };
    let host = temp.path().join("project");
    fs::create_dir(&host).expect("failed to create host dir");
    manager.add_mount("s1", &host, Some("proj")).expect("add failed");
    assert!(manager.remove_mount("s1", "proj"));

    let output = run(&mut manager, "s1", "test", &["-e", "/sessions/s1/mounts/proj"]);

    assert_eq!(output.code, Some(1));
}

#[test]
fn test_working_directory() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let Some(mut manager) = real_manager(&temp) else {
        return;
    };
    let host = temp.path().join("project");
    fs::create_dir(&host).expect("failed to create host dir");
    manager.add_mount("s1", &host, Some("proj")).expect("add failed");
    let options = SpawnOptions::default().with_working_dir("/sessions/s1/mounts/proj");

    let process = manager
        .spawn("s1", "pwd", &[], &options)
        .expect("spawn failed");
    let output = finish(&mut manager, &process.id);

    assert_success(&output, "pwd");
    assert_eq!(output.stdout.trim(), "/sessions/s1/mounts/proj");
}

#[test]
fn test_tmp_is_private() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let Some(mut manager) = real_manager(&temp) else {
        return;
    };

    let output = run(
        &mut manager,
        "s1",
        "sh",
        &["-c", "echo scratch > /tmp/sandbox-private && cat /tmp/sandbox-private"],
    );

    assert_success(&output, "write /tmp");
    assert!(!std::path::Path::new("/tmp/sandbox-private").exists());
}
