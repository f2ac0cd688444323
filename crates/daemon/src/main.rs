//! gitcollector daemon entry point.
//!
//! Loads configuration, lists the repository definitions, starts the
//! definition watcher and runs the collector loop until a shutdown signal
//! arrives.

mod signals;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gitcollector_core::config::AppConfig;
use gitcollector_core::git::{CommitCursor, RepositoryMirror};
use gitcollector_core::{CollectorSet, DefinitionSource, Publisher, Scheduler};

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Mirrors a changing set of git repositories and publishes new commits.
#[derive(Parser, Debug)]
#[command(
    name = "gitcollector",
    version,
    about = "Collects commits from watched git repositories"
)]
struct Args {
    /// Path to the TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the working directory that holds the mirrors.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Override the directory of repository definition files.
    #[arg(long)]
    definitions: Option<PathBuf>,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

/// Read the configuration file (or defaults) and apply CLI overrides.
/// Secrets are resolved later, once logging is up.
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load_from_file(path).context("failed to load configuration file")?,
        None => AppConfig::default(),
    };
    if let Some(work_dir) = &args.work_dir {
        config.daemon.work_dir = work_dir.clone();
    }
    if let Some(definitions) = &args.definitions {
        config.source.definitions_dir = definitions.clone();
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args)?;

    // Initialize tracing
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());

    let filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables in config")?;
    config
        .validate()
        .context("configuration validation failed")?;

    // Startup banner
    info!("========================================");
    info!("  gitcollector v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    if let Some(path) = &args.config {
        info!("Config file   : {}", path.display());
    }
    info!("Work dir      : {}", config.daemon.work_dir.display());
    info!("Definitions   : {}", config.source.definitions_dir.display());
    info!("Namespace     : {}", config.source.namespace);
    info!("Poll interval : {}s", config.source.poll_interval_secs);
    info!("Max commits   : {}", config.daemon.max_commits);
    info!("Log level     : {}", log_level);
    info!("========================================");

    std::fs::create_dir_all(&config.daemon.work_dir).context("failed to create work directory")?;

    // Without the initial listing the repository set cannot be trusted.
    let mut definitions =
        DefinitionSource::new(&config.source.definitions_dir, &config.source.namespace);
    let initial = definitions
        .list()
        .context("failed to list repository definitions")?;

    let shutdown = signals::setup_signal_handlers();

    let (event_tx, event_rx) = tokio::sync::mpsc::channel(64);
    let watch_handle = definitions.watch(
        Duration::from_secs(config.source.poll_interval_secs),
        event_tx,
        shutdown.clone(),
    );

    let publisher = Publisher::from_config(&config.publisher);
    if !publisher.is_enabled() {
        warn!("no publishing endpoint resolved, publishing is disabled");
    }

    let mut scheduler = Scheduler::new(
        CollectorSet::new(&config.daemon.work_dir, config.source_policy()),
        RepositoryMirror::new(config.git.token.clone()),
        CommitCursor::new(config.daemon.max_commits),
        publisher,
        event_rx,
    )
    .with_delays(config.daemon.idle_delay(), config.daemon.activity_delay());

    scheduler.bootstrap(initial).await;
    let stats = scheduler.run(shutdown).await;

    watch_handle.abort();

    info!(
        commits_published = stats.commits_published,
        publish_failures = stats.publish_failures,
        syncs_failed = stats.syncs_failed,
        "gitcollector stopped"
    );
    Ok(())
}
