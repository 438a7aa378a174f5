use chrono::{Duration as ChronoDuration, Local, SecondsFormat};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use task_herald::app::{self, Components};
use task_herald::config::{self, Config};
use task_herald::model::Task;
use task_herald::notify::{DeliveryError, Notifier};
use task_herald::taskwarrior::{NewTask, TaskEditor, TaskSource, TaskwarriorError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct FakeTracker {
    tasks: Arc<Mutex<Vec<Task>>>,
    modified: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    syncs: Arc<Mutex<usize>>,
}

#[async_trait::async_trait]
impl TaskSource for FakeTracker {
    async fn fetch(&self) -> Result<Vec<Task>, TaskwarriorError> {
        Ok(self.tasks.lock().await.clone())
    }
}

#[async_trait::async_trait]
impl TaskEditor for FakeTracker {
    async fn modify(&self, uuid: &str, args: &[String]) -> Result<(), TaskwarriorError> {
        self.modified
            .lock()
            .await
            .push((uuid.to_string(), args.to_vec()));
        Ok(())
    }

    async fn add(&self, _task: &NewTask) -> Result<String, TaskwarriorError> {
        Ok("00000000-0000-4000-8000-000000000000".into())
    }

    async fn sync(&self) -> Result<(), TaskwarriorError> {
        *self.syncs.lock().await += 1;
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        message: &str,
        _headers: &BTreeMap<String, String>,
    ) -> Result<(), DeliveryError> {
        self.messages.lock().await.push(message.to_string());
        Ok(())
    }
}

fn test_config() -> Config {
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.poll_interval_secs = 1;
    cfg.notify_interval_secs = 1;
    cfg.sync_interval_secs = 1;
    cfg.notification_message = "{{.Description}}".into();
    cfg.udas.overrides.clear();
    cfg
}

#[tokio::test]
async fn service_polls_notifies_syncs_and_stops() {
    let mut task = Task::new(1, "u1", "stand up +health");
    task.notification_date = Some(
        (Local::now() - ChronoDuration::seconds(20)).to_rfc3339_opts(SecondsFormat::Secs, false),
    );
    let tracker = FakeTracker::default();
    tracker.tasks.lock().await.push(task);
    let notifier = RecordingNotifier::default();

    let components = Components {
        source: Arc::new(tracker.clone()),
        editor: Arc::new(tracker.clone()),
        notifier: Arc::new(notifier.clone()),
    };
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(app::run_with(test_config(), components, cancel.clone()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while notifier.messages.lock().await.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "no notification sent");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("service should stop after cancellation")
        .unwrap()
        .unwrap();

    assert_eq!(*notifier.messages.lock().await, vec!["stand up".to_string()]);
    assert!(*tracker.syncs.lock().await >= 1);
    let modified = tracker.modified.lock().await;
    assert_eq!(
        modified[0],
        (
            "u1".to_string(),
            vec!["+health".to_string(), "description:stand up".to_string()]
        )
    );
}
