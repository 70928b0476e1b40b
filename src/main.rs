//! Sandbox Sessions - diagnostic command line.
//!
//! `check` reports whether this host can run sandboxed sessions; `run` drives
//! a single session end to end.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use sandbox_sessions::sandbox::{SpawnOptions, StdioMode};
use sandbox_sessions::session::{SessionConfig, SessionManager};
use sandbox_sessions::system;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Sandbox Sessions - isolate commands in bubblewrap-backed sessions.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Base directory for session storage
    #[arg(long, global = true, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    /// Sandbox launcher binary
    #[arg(long, global = true, value_name = "PATH")]
    launcher: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report host support for sandboxed sessions
    Check,
    /// Run a command inside a session
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Session identifier
    #[arg(long)]
    session: String,

    /// Host directory to expose, optionally renamed
    #[arg(long = "mount", value_name = "PATH[:NAME]")]
    mounts: Vec<String>,

    /// Working directory inside the sandbox
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Keep the session directory after the command exits
    #[arg(long, default_value = "false")]
    keep: bool,

    /// Print the launcher invocation instead of running it
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Command and arguments to run
    #[arg(last = true, required = true, value_name = "CMD")]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // stdout carries command output; logs go to stderr
    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    debug!("Sandbox Sessions v{}", env!("CARGO_PKG_VERSION"));

    let mut config = SessionConfig::default();
    if let Some(base_dir) = cli.base_dir {
        config = config.with_base_dir(base_dir);
    }
    if let Some(launcher) = cli.launcher {
        config = config.with_launcher_path(launcher);
    }

    match cli.command {
        Command::Check => check(&config).await,
        Command::Run(args) => run(config, args).await,
    }
}

async fn check(config: &SessionConfig) -> Result<ExitCode> {
    let report = system::check_all(&config.launcher_path);
    // Re-probe asynchronously; the sync probe above also covers the kernel checks
    let launcher = system::probe_launcher(&config.launcher_path).await;

    println!("kernel:           {}", report.kernel_version);
    println!(
        "user namespaces:  {}",
        if report.user_namespaces { "enabled" } else { "disabled" }
    );
    match &launcher {
        Some(info) => println!("launcher:         {} ({})", info.path.display(), info.version),
        None => println!("launcher:         not found at {}", config.launcher_path.display()),
    }
    println!("base directory:   {}", config.base_dir.display());

    if report.sandboxing_available() {
        println!("sandboxing:       available");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("sandboxing:       unavailable");
        Ok(ExitCode::FAILURE)
    }
}

async fn run(config: SessionConfig, args: RunArgs) -> Result<ExitCode> {
    let Some((command, command_args)) = args.command.split_first() else {
        return Err(miette::miette!("no command given"));
    };
    let command_args: Vec<&str> = command_args.iter().map(String::as_str).collect();

    let mut manager = SessionManager::new(config);
    manager.get_or_create(&args.session)?;

    for spec in &args.mounts {
        let (path, name) = parse_mount(spec);
        let host_path = std::path::absolute(path).into_diagnostic()?;
        let mount_point = manager.add_mount(&args.session, &host_path, name)?;
        info!(host = %host_path.display(), staging = %mount_point.display(), "Mounted");
    }

    let mut options = SpawnOptions::default().with_stdio(StdioMode::Inherit);
    if let Some(cwd) = &args.cwd {
        options = options.with_working_dir(cwd);
    }

    let outcome = if args.dry_run {
        print_invocation(&manager, &args.session, command, &command_args, &options);
        Ok(ExitCode::SUCCESS)
    } else {
        spawn_and_wait(&mut manager, &args.session, command, &command_args, &options).await
    };

    if args.keep {
        if let Some(session) = manager.session(&args.session) {
            info!(root = %session.paths.root.display(), "Keeping session");
        }
    } else {
        let report = manager.destroy_session(&args.session);
        for warning in &report.warnings {
            warn!("{warning}");
        }
    }

    outcome
}

fn print_invocation(
    manager: &SessionManager,
    session_id: &str,
    command: &str,
    args: &[&str],
    options: &SpawnOptions,
) {
    let launcher = manager.config().launcher_path.display().to_string();
    let argv = manager
        .build_args(session_id, command, args, options)
        .unwrap_or_default();

    let rendered: Vec<String> = std::iter::once(launcher)
        .chain(argv.iter().map(|arg| arg.to_string_lossy().into_owned()))
        .collect();
    println!("{}", rendered.join(" "));
}

async fn spawn_and_wait(
    manager: &mut SessionManager,
    session_id: &str,
    command: &str,
    args: &[&str],
    options: &SpawnOptions,
) -> Result<ExitCode> {
    let process = manager.spawn(session_id, command, args, options)?;
    info!(process_id = %process.id, pid = process.pid, "Started");

    let exit = loop {
        if let Some(exit) = manager.wait_for_exit(&process.id, Duration::ZERO) {
            break exit;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    };

    debug!(code = ?exit.code, signal = ?exit.signal, "Exited");

    let code = match (exit.code, exit.signal) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    };
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

/// Splits `PATH[:NAME]`. A suffix that cannot be a mount name stays part of
/// the path.
fn parse_mount(spec: &str) -> (&Path, Option<&str>) {
    match spec.rsplit_once(':') {
        Some((path, name)) if !path.is_empty() && !name.is_empty() && !name.contains('/') => {
            (Path::new(path), Some(name))
        }
        _ => (Path::new(spec), None),
    }
}
