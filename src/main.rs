use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use task_herald::{app, config, taskwarrior::TaskwarriorCli};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file (defaults to $TASK_HERALD_CONFIG, ./config.yaml, /etc/task-herald/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Load and validate the config, check the task binary, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let path = config::locate(args.config.as_deref())?;
    let cfg = config::load(&path).with_context(|| format!("loading {}", path.display()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!(config = %path.display(), "configuration loaded");

    if args.check {
        let version = TaskwarriorCli::from_config(&cfg.taskwarrior)
            .ensure_available()
            .await
            .context("taskwarrior not available")?;
        println!("config ok: {} (task {version})", path.display());
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    app::run(cfg, cancel).await
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            warn!(%err, "cannot listen for SIGTERM; falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
