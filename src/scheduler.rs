use chrono::{DateTime, Local};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::due::{self, DateSources, DedupKey, Evaluation};
use crate::model::TaskInfo;
use crate::notify::{self, Notifier};
use crate::render;
use crate::snapshot::SnapshotStore;

/// Outcome counts for one scheduler wake-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub delivered: usize,
    pub failed: usize,
    pub already_sent: usize,
}

pub struct Scheduler {
    store: Arc<SnapshotStore>,
    notifier: Arc<dyn Notifier>,
    sources: DateSources,
    template: String,
    headers: BTreeMap<String, String>,
    sent: Mutex<HashSet<DedupKey>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<SnapshotStore>,
        notifier: Arc<dyn Notifier>,
        sources: DateSources,
        template: impl Into<String>,
        headers: BTreeMap<String, String>,
    ) -> Self {
        Self {
            store,
            notifier,
            sources,
            template: template.into(),
            headers,
            sent: Mutex::new(HashSet::new()),
        }
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Evaluate the current snapshot once and deliver every due, unsent task.
    #[instrument(skip_all)]
    pub async fn tick(&self, now: DateTime<Local>) -> TickReport {
        let tasks = self.store.read().await;
        let mut report = TickReport::default();
        let mut sent = self.sent.lock().await;

        for task in tasks.iter() {
            let resolved = match due::evaluate(task, now, &self.sources) {
                Evaluation::Due(resolved) => resolved,
                Evaluation::NotDue(resolved, reason) => {
                    debug!(uuid = %task.uuid, date = %resolved.raw, ?reason, "task not due");
                    continue;
                }
                Evaluation::NoDate => continue,
            };
            let key = DedupKey::new(task, &resolved);
            if sent.contains(&key) {
                report.already_sent += 1;
                continue;
            }

            let info = TaskInfo::from_task(task, Some(resolved.instant));
            let message = render::render_or_fallback(&info, &self.template);
            let headers = notify::build_headers(&info, &self.headers, task.priority);

            match self.notifier.send(&message, &headers).await {
                Ok(()) => {
                    info!(uuid = %task.uuid, id = task.id, date = %resolved.raw, "notification sent");
                    sent.insert(key);
                    report.delivered += 1;
                }
                Err(err) => {
                    warn!(%err, uuid = %task.uuid, date = %resolved.raw, "notification failed; will retry");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Tick every `interval` until `cancel` fires.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        info!(?interval, "notification scheduler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = self.tick(Local::now()).await;
            if report.delivered > 0 || report.failed > 0 {
                debug!(?report, "scheduler tick finished");
            }
        }
        info!("notification scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, Task};
    use crate::notify::DeliveryError;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, SecondsFormat};

    #[derive(Default)]
    struct RecordingNotifier {
        calls: std::sync::Mutex<Vec<(String, BTreeMap<String, String>)>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(
            &self,
            message: &str,
            headers: &BTreeMap<String, String>,
        ) -> Result<(), DeliveryError> {
            self.calls
                .lock()
                .unwrap()
                .push((message.to_string(), headers.clone()));
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(DeliveryError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(())
        }
    }

    fn due_task(uuid: &str, at: DateTime<Local>) -> Task {
        let mut task = Task::new(1, uuid, "stretch");
        task.notification_date = Some(at.to_rfc3339_opts(SecondsFormat::Secs, false));
        task
    }

    async fn scheduler_with(tasks: Vec<Task>) -> (Scheduler, Arc<RecordingNotifier>) {
        let store = Arc::new(SnapshotStore::new());
        store.replace(tasks).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = Scheduler::new(
            store,
            notifier.clone(),
            DateSources::default(),
            "{{.Description}}",
            BTreeMap::new(),
        );
        (scheduler, notifier)
    }

    #[tokio::test]
    async fn delivers_once_per_key() {
        let now = Local::now();
        let mut task = due_task("u1", now - ChronoDuration::minutes(1));
        task.priority = Some(Priority::Medium);
        let (scheduler, notifier) = scheduler_with(vec![task]).await;

        let first = scheduler.tick(now).await;
        assert_eq!(first.delivered, 1);
        let second = scheduler.tick(now).await;
        assert_eq!(second, TickReport { already_sent: 1, ..Default::default() });

        let calls = notifier.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "stretch");
        assert_eq!(calls[0].1[notify::PRIORITY_HEADER], "high");
    }

    #[tokio::test]
    async fn failure_is_retried_next_tick() {
        let now = Local::now();
        let (scheduler, notifier) = scheduler_with(vec![due_task("u1", now)]).await;
        notifier.fail.store(true, std::sync::atomic::Ordering::SeqCst);

        assert_eq!(scheduler.tick(now).await.failed, 1);
        assert_eq!(scheduler.sent_count().await, 0);

        notifier.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(scheduler.tick(now).await.delivered, 1);
        assert_eq!(notifier.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_delivery_is_dropped_once_window_passes() {
        let now = Local::now();
        let (scheduler, notifier) = scheduler_with(vec![due_task("u1", now)]).await;
        notifier.fail.store(true, std::sync::atomic::Ordering::SeqCst);

        assert_eq!(scheduler.tick(now).await.failed, 1);
        let later = scheduler.tick(now + ChronoDuration::minutes(6)).await;
        assert_eq!(later, TickReport::default());

        assert_eq!(notifier.calls.lock().unwrap().len(), 1);
        assert_eq!(scheduler.sent_count().await, 0);
    }

    #[tokio::test]
    async fn skips_future_expired_and_undated() {
        let now = Local::now();
        let (scheduler, notifier) = scheduler_with(vec![
            due_task("future", now + ChronoDuration::minutes(2)),
            due_task("old", now - ChronoDuration::minutes(6)),
            Task::new(3, "undated", "x"),
        ])
        .await;

        assert_eq!(scheduler.tick(now).await, TickReport::default());
        assert!(notifier.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (scheduler, _notifier) = scheduler_with(vec![]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(
            Duration::from_secs(1),
            scheduler.run(Duration::from_millis(10), cancel),
        )
        .await
        .expect("scheduler should stop once cancelled");
    }
}
