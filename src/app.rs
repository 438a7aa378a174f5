//! Builds the service from config and runs its loops until cancelled.
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::due::DateSources;
use crate::notify::{Notifier, NtfyClient};
use crate::poller;
use crate::render;
use crate::scheduler::Scheduler;
use crate::snapshot::SnapshotStore;
use crate::taskwarrior::{TaskEditor, TaskSource, TaskwarriorCli};
use crate::web::{self, AppState};

/// Injected collaborators; tests swap these for fakes.
#[derive(Clone)]
pub struct Components {
    pub source: Arc<dyn TaskSource>,
    pub editor: Arc<dyn TaskEditor>,
    pub notifier: Arc<dyn Notifier>,
}

impl Components {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let cli = Arc::new(TaskwarriorCli::from_config(&cfg.taskwarrior));
        let token = cfg.ntfy_token().context("failed to read ntfy token")?;
        let notifier = NtfyClient::new(
            &cfg.ntfy.url,
            &cfg.ntfy.topic,
            token,
            std::time::Duration::from_secs(cfg.ntfy.timeout_secs),
        )
        .context("failed to build ntfy client")?;
        Ok(Self {
            source: cli.clone(),
            editor: cli,
            notifier: Arc::new(notifier),
        })
    }
}

pub async fn run(cfg: Config, cancel: CancellationToken) -> Result<()> {
    let components = Components::from_config(&cfg)?;
    run_with(cfg, components, cancel).await
}

pub async fn run_with(cfg: Config, components: Components, cancel: CancellationToken) -> Result<()> {
    if let Err(err) = render::Template::parse(&cfg.notification_message) {
        error!(%err, "notification_message does not parse; the fallback message will be used");
    }

    let store = Arc::new(SnapshotStore::new());
    let sources = DateSources::from_config(&cfg.udas);
    let mut tasks = JoinSet::new();

    tasks.spawn(poller::run_poller(
        components.source.clone(),
        Some(components.editor.clone()),
        store.clone(),
        cfg.poll_interval(),
        cancel.clone(),
    ));

    if let Some(interval) = cfg.sync_interval() {
        tasks.spawn(poller::run_sync(
            components.editor.clone(),
            interval,
            cancel.clone(),
        ));
    }

    let scheduler = Scheduler::new(
        store.clone(),
        components.notifier.clone(),
        sources.clone(),
        cfg.notification_message.clone(),
        cfg.ntfy.headers.clone(),
    );
    let notify_interval = cfg.notify_interval();
    let scheduler_cancel = cancel.clone();
    tasks.spawn(async move { scheduler.run(notify_interval, scheduler_cancel).await });

    if cfg.http.enabled {
        let auth_token = cfg.http_auth_token().context("failed to read http auth token")?;
        let state = AppState {
            store: store.clone(),
            editor: components.editor.clone(),
            sources,
            auth_token,
        };
        let listener = tokio::net::TcpListener::bind(&cfg.http.listen)
            .await
            .with_context(|| format!("failed to bind {}", cfg.http.listen))?;
        info!(listen = %cfg.http.listen, "http control surface listening");
        let shutdown = cancel.clone();
        tasks.spawn(async move {
            let server = axum::serve(listener, web::router(state))
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(err) = server.await {
                error!(%err, "http server failed");
            }
        });
    }

    info!("task-herald running");
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(%err, "background task panicked");
            cancel.cancel();
        }
    }
    info!("task-herald stopped");
    Ok(())
}
