//! The task store: persistence for task records, keyed by id.
//!
//! The default implementation is an in-memory keyed table. External
//! backends implement the same trait; the scheduler and worker never
//! see the difference.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::task::record::{TaskRecord, TaskStatus};

/// Attribute-equality filter predicates for [`TaskStore::filter`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub name: Option<String>,
    pub status: Option<TaskStatus>,
}

/// A patch applied to an existing task record via [`TaskStore::update`].
#[derive(Debug, Clone)]
pub struct TaskPatch {
    pub status: TaskStatus,
    pub result: Option<crate::task::record::TaskResult>,
    pub revoked_reason: Option<crate::task::record::RevokedReason>,
}

/// Persistence contract for task records.
///
/// Implementations must serialize concurrent updates to the same id —
/// last-writer-wins is not acceptable for state transitions.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, record: TaskRecord) -> Result<TaskRecord, StoreError>;
    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<TaskRecord, StoreError>;
    async fn get(&self, id: Uuid) -> Option<TaskRecord>;
    async fn filter(&self, filter: TaskFilter) -> Vec<TaskRecord>;
    async fn delete(&self, ids: &[Uuid]) -> usize;

    /// Blocks until the task reaches a `READY_STATE`, or `timeout` elapses.
    async fn wait_for_terminal(
        &self,
        id: Uuid,
        timeout: Duration,
    ) -> Result<TaskRecord, StoreError>;

    /// Called by the scheduler right after a task is created.
    async fn on_created(&self, _task: &TaskRecord) {}
    /// Called by the worker when it picks the task off the queue.
    async fn on_received(&self, _task: &TaskRecord) {}
    /// Called by the worker when it begins executing the job callable.
    async fn on_start(&self, _task: &TaskRecord) {}
    /// Called by the worker on any terminal transition.
    async fn on_finish(&self, _task: &TaskRecord) {}
}

/// Default in-memory task store.
///
/// Each id has its own entry behind a shared mutex-guarded map; a
/// `broadcast` channel per-task wakes `wait_for_terminal` callers
/// without polling.
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, TaskRecord>>,
    terminal: Mutex<HashMap<Uuid, broadcast::Sender<()>>>,
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            terminal: Mutex::new(HashMap::new()),
        }
    }

    async fn notify_if_terminal(&self, task: &TaskRecord) {
        if task.status.is_ready() {
            let mut terminal = self.terminal.lock().await;
            if let Some(tx) = terminal.remove(&task.id) {
                let _ = tx.send(());
            }
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, record: TaskRecord) -> Result<TaskRecord, StoreError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        tasks.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<TaskRecord, StoreError> {
        let updated = {
            let mut tasks = self.tasks.lock().await;
            let task = tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            task.transition(patch.status)?;
            if let Some(result) = patch.result {
                task.result = Some(result);
            }
            if let Some(reason) = patch.revoked_reason {
                task.revoked_reason = Some(reason);
            }
            task.clone()
        };
        self.notify_if_terminal(&updated).await;
        Ok(updated)
    }

    async fn get(&self, id: Uuid) -> Option<TaskRecord> {
        self.tasks.lock().await.get(&id).cloned()
    }

    async fn filter(&self, filter: TaskFilter) -> Vec<TaskRecord> {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|t| filter.name.as_deref().is_none_or(|n| n == t.name))
            .filter(|t| filter.status.is_none_or(|s| s == t.status))
            .cloned()
            .collect()
    }

    async fn delete(&self, ids: &[Uuid]) -> usize {
        let mut tasks = self.tasks.lock().await;
        let mut count = 0;
        for id in ids {
            if tasks.remove(id).is_some() {
                count += 1;
            }
        }
        count
    }

    async fn wait_for_terminal(
        &self,
        id: Uuid,
        timeout: Duration,
    ) -> Result<TaskRecord, StoreError> {
        // Subscribe before the first status check: a concurrent `update`
        // that drives the task terminal between the check and the
        // subscribe would otherwise fire `notify_if_terminal` into a
        // sender nobody is listening to yet, and the wakeup is lost.
        let mut rx = {
            let mut terminal = self.terminal.lock().await;
            terminal
                .entry(id)
                .or_insert_with(|| broadcast::channel(1).0)
                .subscribe()
        };

        let task = self.get(id).await.ok_or(StoreError::NotFound(id))?;
        if task.status.is_ready() {
            return Ok(task);
        }

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(_) => self.get(id).await.ok_or(StoreError::NotFound(id)),
            Err(_) => Err(StoreError::Timeout(id)),
        }
    }
}

/// A trait object alias, since callers rarely need to be generic over
/// the concrete store implementation.
pub type SharedTaskStore = Arc<dyn TaskStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(name: &str) -> TaskRecord {
        TaskRecord::builder()
            .name(name)
            .expiry(Utc::now() + chrono::Duration::seconds(60))
            .timeout_secs(30u64)
            .build()
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = InMemoryTaskStore::new();
        let task = sample("Addition");
        store.create(task.clone()).await.unwrap();
        assert!(matches!(
            store.create(task).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn wait_for_terminal_wakes_on_update() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = store.create(sample("Addition")).await.unwrap();
        let id = task.id;

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .wait_for_terminal(id, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        store
            .update(
                id,
                TaskPatch {
                    status: TaskStatus::Received,
                    result: None,
                    revoked_reason: None,
                },
            )
            .await
            .unwrap();
        store
            .update(
                id,
                TaskPatch {
                    status: TaskStatus::Started,
                    result: None,
                    revoked_reason: None,
                },
            )
            .await
            .unwrap();
        store
            .update(
                id,
                TaskPatch {
                    status: TaskStatus::Success,
                    result: Some(crate::task::record::TaskResult::Value(5.into())),
                    revoked_reason: None,
                },
            )
            .await
            .unwrap();

        let finished = waiter.await.unwrap();
        assert_eq!(finished.status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn wait_for_terminal_times_out() {
        let store = InMemoryTaskStore::new();
        let task = store.create(sample("Sleeper")).await.unwrap();
        let result = store
            .wait_for_terminal(task.id, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn wait_for_terminal_sees_a_transition_raced_against_the_subscribe() {
        // Regression for a lost-wakeup race: a task that goes terminal
        // concurrently with the waiter's subscribe must still be
        // observed, not just one that goes terminal well afterwards.
        let store = Arc::new(InMemoryTaskStore::new());
        let task = store.create(sample("Addition")).await.unwrap();
        let id = task.id;

        store
            .update(
                id,
                TaskPatch {
                    status: TaskStatus::Received,
                    result: None,
                    revoked_reason: None,
                },
            )
            .await
            .unwrap();
        store
            .update(
                id,
                TaskPatch {
                    status: TaskStatus::Started,
                    result: None,
                    revoked_reason: None,
                },
            )
            .await
            .unwrap();

        let finisher = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update(
                        id,
                        TaskPatch {
                            status: TaskStatus::Success,
                            result: Some(crate::task::record::TaskResult::Value(5.into())),
                            revoked_reason: None,
                        },
                    )
                    .await
                    .unwrap();
            })
        };

        let result = store.wait_for_terminal(id, Duration::from_secs(5)).await;
        finisher.await.unwrap();

        assert_eq!(result.unwrap().status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn filter_matches_by_name_and_status() {
        let store = InMemoryTaskStore::new();
        store.create(sample("Addition")).await.unwrap();
        store.create(sample("Sleeper")).await.unwrap();

        let found = store
            .filter(TaskFilter {
                name: Some("Addition".into()),
                status: None,
            })
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Addition");
    }
}
