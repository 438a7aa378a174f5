use std::sync::Arc;
use tokio::sync::RwLock;

use crate::model::Task;

/// Latest polled task list. Readers get the old or the new list, never a mix.
#[derive(Debug)]
pub struct SnapshotStore {
    tasks: RwLock<Arc<[Task]>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(Arc::from(Vec::new())),
        }
    }

    pub async fn replace(&self, tasks: Vec<Task>) {
        let next: Arc<[Task]> = tasks.into();
        *self.tasks.write().await = next;
    }

    pub async fn read(&self) -> Arc<[Task]> {
        self.tasks.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn find(&self, uuid: &str) -> Option<Task> {
        let view = self.read().await;
        view.iter().find(|t| t.uuid == uuid).cloned()
    }
}
