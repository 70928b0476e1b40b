//! Integration tests for the VM compatibility adapter.
//!
//! Processes run through a `/bin/sh` stand-in launcher.

use std::thread;
use std::time::Duration;

use sandbox_sessions::compat::{HEARTBEAT_PROCESS, VmCompatAdapter};
use sandbox_sessions::sandbox::{SpawnOptions, StdioMode};
use sandbox_sessions::session::{SessionConfig, SessionManager, SharedSessionManager};
use tempfile::TempDir;

const FAKE_LAUNCHER: &str = r#"while [ "$#" -gt 0 ]; do if [ "$1" = "--" ]; then shift; exec "$@"; fi; shift; done; exit 127"#;

fn shared_manager(temp: &TempDir) -> SharedSessionManager {
    let config = SessionConfig::default()
        .with_base_dir(temp.path().join("sessions"))
        .with_launcher_path("/bin/sh")
        .with_launcher_args(["-c", FAKE_LAUNCHER, "fake-bwrap"]);
    SessionManager::new(config).into_shared()
}

fn spawn(shared: &SharedSessionManager, session: &str, command: &str, args: &[&str]) {
    let options = SpawnOptions::default().with_stdio(StdioMode::Null);
    shared
        .lock()
        .expect("manager lock poisoned")
        .spawn(session, command, args, &options)
        .expect("spawn failed");
}

#[test]
fn test_identity() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let adapter = VmCompatAdapter::new(shared_manager(&temp), "agent-7");

    assert_eq!(adapter.session_id(), "agent-7");
    assert_eq!(adapter.vm_process_id(), "sandbox-agent-7");
    assert!(adapter.is_guest_connected());
    assert!(adapter.is_process_running(HEARTBEAT_PROCESS));
}

#[test]
fn test_process_matching_by_command_and_argument() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let shared = shared_manager(&temp);
    let adapter = VmCompatAdapter::new(shared.clone(), "s1");

    spawn(&shared, "s1", "sleep", &["31"]);

    assert!(adapter.is_process_running("sleep"));
    assert!(adapter.is_process_running("31"));
    assert!(!adapter.is_process_running("node"));

    shared
        .lock()
        .expect("manager lock poisoned")
        .destroy_session("s1");
}

#[test]
fn test_exited_process_not_reported() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let shared = shared_manager(&temp);
    let adapter = VmCompatAdapter::new(shared.clone(), "s1");

    spawn(&shared, "s1", "true", &[]);
    thread::sleep(Duration::from_millis(200));

    assert!(!adapter.is_process_running("true"));
}

#[test]
fn test_other_sessions_not_visible() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let shared = shared_manager(&temp);
    let adapter = VmCompatAdapter::new(shared.clone(), "mine");

    spawn(&shared, "theirs", "sleep", &["30"]);

    assert!(!adapter.is_process_running("sleep"));

    shared
        .lock()
        .expect("manager lock poisoned")
        .destroy_session("theirs");
}

#[test]
fn test_disconnect_tears_down_session() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let shared = shared_manager(&temp);
    let mut adapter = VmCompatAdapter::new(shared.clone(), "s1");

    spawn(&shared, "s1", "sleep", &["30"]);
    let root = shared
        .lock()
        .expect("manager lock poisoned")
        .session("s1")
        .expect("session missing")
        .paths
        .root
        .clone();
    assert!(adapter.is_process_running("sleep"));

    adapter.disconnect();

    assert!(!adapter.is_guest_connected());
    assert!(!adapter.is_process_running(HEARTBEAT_PROCESS));
    assert!(!adapter.is_process_running("sleep"));
    assert!(!root.exists());
    assert!(shared.lock().expect("manager lock poisoned").session("s1").is_none());

    // Terminal and idempotent
    adapter.disconnect();
    assert!(!adapter.is_guest_connected());
}
