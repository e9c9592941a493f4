//! The worker dispatch loop: pulls task ids off the queue, loads the
//! job, invokes it under a timeout, and publishes lifecycle updates.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::errors::WorkerError;
use crate::job::TaskContext;
use crate::queue::QueueConsumer;
use crate::registry::SharedJobRegistry;
use crate::task::{RevokedReason, SharedTaskStore, TaskPatch, TaskResult, TaskStatus};

/// Per-worker tuning. `backlog` caps in-flight tasks; the dispatch
/// loop stops polling the queue while saturated.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub backlog: usize,
    pub retry_base_delay: StdDuration,
    pub retry_max_delay: StdDuration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            backlog: 1,
            retry_base_delay: StdDuration::from_secs(1),
            retry_max_delay: StdDuration::from_secs(3600),
        }
    }
}

/// A worker: a single-threaded cooperative dispatch loop over a
/// `Queue` consumer, backed by the shared registry and store.
pub struct Worker {
    registry: SharedJobRegistry,
    store: SharedTaskStore,
    queue: Arc<dyn crate::queue::Queue>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        registry: SharedJobRegistry,
        store: SharedTaskStore,
        queue: Arc<dyn crate::queue::Queue>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            registry,
            store,
            queue,
            config,
        }
    }

    /// Run until the consumer's queue is closed. The `backlog`
    /// semaphore gates how many tasks this worker drives concurrently;
    /// polling the queue stops while saturated.
    pub async fn run(self: Arc<Self>, mut consumer: Box<dyn QueueConsumer>) {
        info!(worker_id = %self.config.worker_id, backlog = self.config.backlog, "worker starting");
        let backlog = Arc::new(Semaphore::new(self.config.backlog));

        while let Some(message) = consumer.recv().await {
            let permit = backlog
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let worker = self.clone();
            tokio::spawn(async move {
                worker.process(message.task_id).await;
                drop(permit);
            });
        }

        info!(worker_id = %self.config.worker_id, "worker stopped: queue closed");
    }

    /// Process one task end to end. Logs and drops any [`WorkerError`]
    /// from [`Self::dispatch`] — these are plumbing failures (store
    /// unreachable, job vanished from the registry), distinct from a
    /// job's own failure, which is captured as the task's `result`.
    async fn process(&self, task_id: uuid::Uuid) {
        if let Err(e) = self.dispatch(task_id).await {
            error!(%task_id, error = %e, "worker dispatch failed");
        }
    }

    /// Mirrors `SPEC_FULL.md` §4.5 step by step.
    async fn dispatch(&self, task_id: uuid::Uuid) -> Result<(), WorkerError> {
        // 1. Fetch; drop silently if missing or already terminal.
        let Some(task) = self.store.get(task_id).await else {
            return Ok(());
        };
        if task.status.is_ready() {
            debug!(%task_id, "dropping duplicate delivery of terminal task");
            return Ok(());
        }
        if task.status != TaskStatus::Pending && task.status != TaskStatus::Retry {
            debug!(%task_id, status = ?task.status, "dropping delivery of in-flight task");
            return Ok(());
        }
        let from_retry = task.status == TaskStatus::Retry;

        // 2. PENDING/RETRY -> RECEIVED.
        let task = self
            .store
            .update(
                task_id,
                TaskPatch {
                    status: TaskStatus::Received,
                    result: None,
                    revoked_reason: None,
                },
            )
            .await?;
        self.store.on_received(&task).await;

        // 3. Expiry check.
        let now = Utc::now();
        if now > task.expiry {
            self.revoke(task_id, RevokedReason::Expired).await;
            return Ok(());
        }

        // 4. RECEIVED -> STARTED.
        let task = self
            .store
            .update(
                task_id,
                TaskPatch {
                    status: TaskStatus::Started,
                    result: None,
                    revoked_reason: None,
                },
            )
            .await?;
        self.store.on_start(&task).await;

        let descriptor = self.registry.lookup(&task.name)?;

        // 6. Invoke under a timeout bounded by min(task.timeout, expiry - now).
        let remaining = (task.expiry - now).to_std().unwrap_or(StdDuration::ZERO);
        let ceiling = StdDuration::from_secs(task.timeout_secs).min(remaining);
        let ctx = TaskContext::new(task_id, task.retry_count + if from_retry { 1 } else { 0 });
        let outcome = tokio::time::timeout(
            ceiling,
            descriptor
                .job
                .call(ctx, task.args.clone(), task.kwargs.clone()),
        )
        .await;

        match outcome {
            // 9. Timed out.
            Err(_) => {
                self.revoke(task_id, RevokedReason::Timeout).await;
            }
            // 7. Succeeded.
            Ok(Ok(value)) => {
                info!(%task_id, name = %task.name, "task succeeded");
                if let Ok(task) = self
                    .store
                    .update(
                        task_id,
                        TaskPatch {
                            status: TaskStatus::Success,
                            result: Some(TaskResult::Value(value)),
                            revoked_reason: None,
                        },
                    )
                    .await
                {
                    self.store.on_finish(&task).await;
                }
            }
            // 8. Failed: retry or terminal failure.
            Ok(Err(error)) => {
                let retriable = descriptor.job.is_retriable(&error)
                    && task.retry_count < descriptor.max_retries;
                if retriable {
                    warn!(%task_id, name = %task.name, error = %error, "task failed, scheduling retry");
                    if let Ok(task) = self
                        .store
                        .update(
                            task_id,
                            TaskPatch {
                                status: TaskStatus::Retry,
                                result: Some(TaskResult::Error(error)),
                                revoked_reason: None,
                            },
                        )
                        .await
                    {
                        self.schedule_retry(task.id, task.retry_count).await;
                    }
                } else {
                    self.fail(task_id, error).await;
                }
            }
        }
        Ok(())
    }

    async fn revoke(&self, task_id: uuid::Uuid, reason: RevokedReason) {
        warn!(%task_id, ?reason, "revoking task");
        if let Ok(task) = self
            .store
            .update(
                task_id,
                TaskPatch {
                    status: TaskStatus::Revoked,
                    result: None,
                    revoked_reason: Some(reason),
                },
            )
            .await
        {
            self.store.on_finish(&task).await;
        }
    }

    async fn fail(&self, task_id: uuid::Uuid, error: String) {
        error!(%task_id, %error, "task failed permanently");
        if let Ok(task) = self
            .store
            .update(
                task_id,
                TaskPatch {
                    status: TaskStatus::Failure,
                    result: Some(TaskResult::Error(error)),
                    revoked_reason: None,
                },
            )
            .await
        {
            self.store.on_finish(&task).await;
        }
    }

    /// Re-enqueue a `RETRY` task after an exponential backoff
    /// (`base * 2^retry_count`, capped at `retry_max_delay`).
    async fn schedule_retry(&self, task_id: uuid::Uuid, retry_count: u32) {
        let delay = self
            .config
            .retry_base_delay
            .saturating_mul(1u32.checked_shl(retry_count).unwrap_or(u32::MAX))
            .min(self.config.retry_max_delay);
        let queue = self.queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.put(crate::queue::Message::request(task_id)) {
                error!(%task_id, error = %e, "failed to re-enqueue retried task");
            }
        });
    }
}
