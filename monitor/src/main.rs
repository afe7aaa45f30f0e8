//! Folderwatch - reconfigurable directory watch service.
//!
//! This binary watches a directory and prints a notice for every file that is
//! added, changed or removed under it.
//!
//! # Commands
//!
//! - `folderwatch run`: Watch a directory until interrupted. Every line read
//!   from stdin is taken as a new directory to watch.
//! - `folderwatch check <path>`: Verify that a directory can be watched.
//!
//! # Environment Variables
//!
//! See `folderwatch::config` for available configuration options.

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use folderwatch::config::Config;
use folderwatch::error::{EventDeliveryError, WatchTeardownError};
use folderwatch::host::Core;
use folderwatch::session::{SessionOptions, WatchSession};
use folderwatch::sink::EventSink;
use folderwatch::types::{FileEvent, WatchPath};

/// Time allowed for background tasks (stdin reader) to finish on exit.
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

/// Folderwatch - reconfigurable directory watch service.
///
/// Watches a directory and reports file additions, changes and removals.
#[derive(Parser, Debug)]
#[command(name = "folderwatch")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    FOLDERWATCH_PATH           Directory to watch (default: ~/Documents)
    FOLDERWATCH_RECURSIVE      Watch subdirectories (default: true)
    FOLDERWATCH_INITIAL_SCAN   Report existing files on start (default: false)

EXAMPLES:
    # Watch the default directory
    folderwatch run

    # Watch a specific directory, emitting JSON lines
    folderwatch run --path /tmp/a --json

    # Switch to another directory while running
    echo /tmp/b | folderwatch run --path /tmp/a
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Watch a directory and print every file event.
    ///
    /// Each line read from stdin replaces the watched directory.
    Run {
        /// Directory to watch (overrides FOLDERWATCH_PATH).
        #[arg(short, long)]
        path: Option<String>,

        /// Only watch the directory's direct entries.
        #[arg(long)]
        non_recursive: bool,

        /// Report files that already exist when a watch starts.
        #[arg(long)]
        initial_scan: bool,

        /// Print events as JSON lines instead of notices.
        #[arg(long)]
        json: bool,
    },

    /// Check that a directory can be watched, then exit.
    Check {
        /// Directory to check.
        path: String,
    },
}

/// Prints events to stdout, one per line.
#[derive(Debug)]
struct NoticeSink {
    json: bool,
}

impl EventSink for NoticeSink {
    fn on_event(&self, event: FileEvent) -> std::result::Result<(), EventDeliveryError> {
        let line = if self.json {
            serde_json::to_string(&event)
                .map_err(|e| EventDeliveryError::Rejected(e.to_string()))?
        } else {
            event.to_string()
        };

        writeln!(io::stdout().lock(), "{line}")
            .map_err(|e| EventDeliveryError::Rejected(e.to_string()))
    }

    fn on_session_opened(&self, root: &Path) {
        info!(root = %root.display(), "Watching directory");
    }

    fn on_session_closed(&self, root: &Path, teardown: Option<&WatchTeardownError>) {
        match teardown {
            Some(e) => warn!(root = %root.display(), error = %e, "Stopped watching, watch leaked"),
            None => info!(root = %root.display(), "Stopped watching directory"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Check { path } => run_check(&path),
        Command::Run {
            path,
            non_recursive,
            initial_scan,
            json,
        } => {
            let config = load_config(path, non_recursive, initial_scan)
                .context("Failed to load configuration")?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            let result = runtime.block_on(run_watch(config, json));

            // The stdin reader blocks in a background thread; do not wait on it forever
            runtime.shutdown_timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS));

            result
        }
    }
}

/// Builds the configuration from the environment, then applies CLI overrides.
fn load_config(
    path: Option<String>,
    non_recursive: bool,
    initial_scan: bool,
) -> folderwatch::Result<Config> {
    let mut config = Config::from_env()?;

    if let Some(path) = path {
        config.watch_path = WatchPath::new(path)?;
    }
    if non_recursive {
        config.recursive = false;
    }
    if initial_scan {
        config.initial_scan = true;
    }

    Ok(config)
}

/// Runs the check command: arms and releases a watch on `path`.
fn run_check(path: &str) -> Result<()> {
    let watch_path = WatchPath::new(path).context("Invalid path")?;

    let mut session = WatchSession::open(watch_path, SessionOptions::default())
        .with_context(|| format!("Cannot watch {path}"))?;

    println!("OK: {} can be watched", session.root().display());

    session
        .close()
        .context("Watch was armed but could not be released")?;

    Ok(())
}

/// Runs the watch service until a shutdown signal arrives.
async fn run_watch(config: Config, json: bool) -> Result<()> {
    init_logging();

    info!(
        watch_path = %config.watch_path,
        recursive = config.recursive,
        initial_scan = config.initial_scan,
        "Configuration loaded"
    );

    let mut core = Core::load(&config, NoticeSink { json }).await;

    let (settings_tx, settings_rx) = watch::channel(config.watch_path.clone());
    core.follow_settings(settings_rx).await;
    tokio::spawn(read_paths_from_stdin(settings_tx));

    info!("Folderwatch running. Press Ctrl+C to stop.");

    wait_for_shutdown().await;
    info!("Shutdown signal received");

    core.unload().await;

    info!("Folderwatch stopped");
    Ok(())
}

/// Publishes every non-blank stdin line as the new watch path.
async fn read_paths_from_stdin(settings: watch::Sender<WatchPath>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match WatchPath::new(line.trim()) {
                Ok(path) => {
                    if settings.send(path).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring blank path on stdin"),
            },
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
}

/// Initializes the logging subsystem.
///
/// Logs go to stderr so stdout carries only events.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
