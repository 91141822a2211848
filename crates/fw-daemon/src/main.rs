//! foldwise daemon: drains the reconciliation queue until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fw_core::config::{Config, LogFormat};
use fw_daemon::daemon::Daemon;
use fw_daemon::notify::LogSink;
use fw_harness::policy::RuleExecutor;
use fw_telemetry::logging::{self, Format};
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Keep folder trees organized by reconciling them against their change log.
#[derive(Parser)]
#[command(name = "fw-daemon", version, about)]
struct Cli {
    /// Config file (default: ~/.foldwise/config.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request a reconciliation for this user at startup. Repeatable.
    #[arg(short, long = "user")]
    users: Vec<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };

    let format = match config.general.log_format {
        LogFormat::Human => Format::Human,
        LogFormat::Json => Format::Json,
    };
    logging::init("fw-daemon", &config.general.log_level, format);
    info!(version = env!("CARGO_PKG_VERSION"), "foldwise daemon starting");

    let mut daemon = Daemon::new(config, Arc::new(RuleExecutor::new()), Arc::new(LogSink))
        .await
        .context("failed to start daemon")?;
    daemon.start_workers();

    for user_id in cli.users {
        if !daemon.request_reconciliation(user_id).await {
            warn!(user_id, "reconciliation not admitted");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("ctrl-c received");
    daemon.shutdown().await;
    Ok(())
}
