//! wardend - run a program on a pseudo-terminal and keep it running
//!
//! This is the main entry point for the warden service.
//! It wires together all the components:
//! - Configuration loading and command-line overrides
//! - Task spawning with the configured split function
//! - The supervising loop and its failure window
//! - Signal-driven graceful shutdown
//! - Event output as text or JSON lines

mod record;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use record::{write_event, OutputFormat};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use warden_config::{load_config, Profile, SplitPolicy};
use warden_core::{supervise, SupervisorError, TripCondition};
use warden_task::Task;
use warden_util::default_config_path;

/// wardend - keep a program running on a pseudo-terminal
#[derive(Parser, Debug)]
#[command(name = "wardend")]
#[command(about = "Run a program on a pseudo-terminal and restart it when it fails", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/warden/config.toml)
    #[arg(short, long, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Failures tolerated in the window
    #[arg(long)]
    max_failures: Option<usize>,

    /// Length of the failure window in milliseconds
    #[arg(long)]
    within_ms: Option<u64>,

    /// When a full failure window stops supervision
    #[arg(long, value_enum)]
    trip: Option<Trip>,

    /// Output split: lines, delimiters:<bytes> or regex:<pattern>
    #[arg(long)]
    split: Option<SplitPolicy>,

    /// Event output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Program and arguments, replacing the configured ones. The configured
    /// environment and working directory still apply.
    #[arg(last = true)]
    command: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Trip {
    OldestExpired,
    WithinDuration,
}

impl From<Trip> for TripCondition {
    fn from(trip: Trip) -> Self {
        match trip {
            Trip::OldestExpired => TripCondition::OldestExpired,
            Trip::WithinDuration => TripCondition::WithinDuration,
        }
    }
}

/// Build the profile from the config file and command line.
///
/// A trailing command alone runs with defaults; with an explicit config file
/// it replaces only the configured program and arguments.
fn resolve_profile(args: &Args) -> Result<Profile> {
    let mut profile = match (&args.config, args.command.split_first()) {
        (None, Some((program, rest))) => Profile::for_command(program.clone(), rest.iter().cloned()),
        (config, command) => {
            let path = config.clone().unwrap_or_else(default_config_path);
            let mut profile = load_config(&path)
                .with_context(|| format!("Failed to load config from {:?}", path))?;
            info!(config_path = %path.display(), "Configuration loaded");

            if let Some((program, rest)) = command {
                let replacement = Profile::for_command(program.clone(), rest.iter().cloned()).command;
                profile.command.program = replacement.program;
                profile.command.args = replacement.args;
            }
            profile
        }
    };

    if let Some(max_failures) = args.max_failures {
        if max_failures == 0 {
            bail!("--max-failures must be at least 1");
        }
        profile.restart.max_failures = max_failures;
    }
    if let Some(within_ms) = args.within_ms {
        if within_ms == 0 {
            bail!("--within-ms must be greater than 0");
        }
        profile.restart.within = Duration::from_millis(within_ms);
    }
    if let Some(trip) = args.trip {
        profile.restart.trip = trip.into();
    }
    if let Some(split) = &args.split {
        profile.split = split.clone();
    }

    Ok(profile)
}

/// Resolves on the first SIGTERM, SIGINT or SIGHUP
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
            _ = sighup.recv() => info!("Received SIGHUP, shutting down gracefully"),
        }
    })
}

async fn run(args: Args) -> Result<()> {
    let profile = resolve_profile(&args)?;
    debug!(?profile, "Resolved profile");

    let splitter = profile
        .split
        .splitter()
        .with_context(|| format!("Invalid split '{}'", profile.split))?;

    let task = Task::spawn_with(profile.command.clone(), splitter, profile.options)
        .with_context(|| format!("Failed to start {}", profile.command.display_name()))?;

    let mut supervisor = profile.restart.supervisor();
    info!(
        program = %profile.command.display_name(),
        max_failures = supervisor.max_failures(),
        within_ms = supervisor.within().as_millis() as u64,
        trip = ?supervisor.trip(),
        split = %profile.split,
        "Supervising"
    );

    let shutdown = shutdown_signal()?;
    let format = args.format;
    let mut out = std::io::stdout().lock();

    let result = supervise(task, &mut supervisor, shutdown, profile.grace, |event| {
        if let Err(e) = write_event(&mut out, format, event) {
            warn!(error = %e, "Failed to write event");
        }
    })
    .await;

    match result {
        Ok(shutdown) => {
            info!(task_id = %shutdown.task_id, forced = shutdown.forced, "wardend stopped");
            Ok(())
        }
        Err(e @ SupervisorError::Exhausted { .. }) => {
            error!(error = %e, "Giving up on task");
            Err(e.into())
        }
        Err(e) => Err(e).context("Supervision failed"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries task events
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "wardend starting");

    run(args).await
}
