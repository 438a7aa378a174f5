//! Poll and sync loops that keep the snapshot fresh.
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::snapshot::SnapshotStore;
use crate::tags;
use crate::taskwarrior::{TaskEditor, TaskSource, TaskwarriorError};

/// Fetch once, clean up tag markers, and swap the snapshot.
/// On error the previous snapshot stays in place.
#[instrument(skip_all)]
pub async fn poll_once(
    source: &dyn TaskSource,
    editor: Option<&dyn TaskEditor>,
    store: &SnapshotStore,
) -> Result<usize, TaskwarriorError> {
    let mut tasks = source.fetch().await?;
    let cleaned = tags::cleanup(&mut tasks, editor).await;
    if cleaned > 0 {
        debug!(cleaned, "applied tag directives");
    }
    let count = tasks.len();
    store.replace(tasks).await;
    Ok(count)
}

pub async fn run_poller(
    source: Arc<dyn TaskSource>,
    editor: Option<Arc<dyn TaskEditor>>,
    store: Arc<SnapshotStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(?interval, "task poller started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match poll_once(source.as_ref(), editor.as_deref(), &store).await {
            Ok(count) => debug!(count, "snapshot refreshed"),
            Err(err) => error!(%err, "task poll failed; keeping previous snapshot"),
        }
    }
    info!("task poller stopped");
}

/// Runs `task sync` immediately and then every `interval`.
pub async fn run_sync(editor: Arc<dyn TaskEditor>, interval: Duration, cancel: CancellationToken) {
    info!(?interval, "task sync loop started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(err) = editor.sync().await {
            warn!(%err, "task sync failed");
        }
    }
    info!("task sync loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Task;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    struct QueueSource {
        results: Mutex<VecDeque<Result<Vec<Task>, TaskwarriorError>>>,
    }

    #[async_trait]
    impl TaskSource for QueueSource {
        async fn fetch(&self) -> Result<Vec<Task>, TaskwarriorError> {
            self.results
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[tokio::test]
    async fn failed_poll_keeps_previous_snapshot() {
        let source = QueueSource {
            results: Mutex::new(VecDeque::from(vec![
                Ok(vec![Task::new(1, "u1", "first +home")]),
                Err(TaskwarriorError::MalformedOutput("garbage".into())),
            ])),
        };
        let store = SnapshotStore::new();

        assert_eq!(poll_once(&source, None, &store).await.unwrap(), 1);
        assert!(poll_once(&source, None, &store).await.is_err());

        let view = store.read().await;
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].description, "first");
        assert_eq!(view[0].tags, vec!["home".to_string()]);
    }
}
