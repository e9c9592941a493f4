//! The command surface: the monitor hosts the scheduler and the
//! authoritative store, and answers the RPC-style commands in
//! `SPEC_FULL.md` §4.7/§6.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::errors::{SchedulerError, StoreError};
use crate::queue::Queue;
use crate::registry::{JobSummary, SharedJobRegistry};
use crate::scheduler::Scheduler;
use crate::task::{SharedTaskStore, TaskFilter, TaskRecord};

/// A `(job name, seconds until its next scheduled run)` pair, as
/// returned by `next_scheduled`.
#[derive(Debug, Clone, Serialize)]
pub struct NextScheduled {
    pub job: String,
    pub seconds_until_next: i64,
}

/// Hosts the scheduler and store and dispatches named commands. One
/// monitor per queue; shared behind an `Arc` with the binary's tick
/// loop and any transport adapter.
pub struct Monitor {
    registry: SharedJobRegistry,
    store: SharedTaskStore,
    scheduler: Scheduler,
}

impl Monitor {
    pub fn new(registry: SharedJobRegistry, store: SharedTaskStore, queue: Arc<dyn Queue>) -> Self {
        let scheduler = Scheduler::new(registry.clone(), store.clone(), queue);
        Self {
            registry,
            store,
            scheduler,
        }
    }

    /// `addtask`: create (or, under the overlap guard, return the
    /// existing) task and hand back its record.
    pub async fn addtask(
        &self,
        jobname: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<TaskRecord, SchedulerError> {
        self.scheduler.queue_task(jobname, args, kwargs).await
    }

    /// `addtask_noack`: fire-and-forget variant of `addtask`. Errors
    /// are logged, not returned, since there is no caller to surface
    /// them to.
    pub fn addtask_noack(
        self: &Arc<Self>,
        jobname: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) {
        let monitor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = monitor.addtask(&jobname, args, kwargs).await {
                tracing::error!(jobname, error = %e, "addtask_noack failed");
            }
        });
    }

    /// `get_task`: lookup by id, `None` if missing (the RPC layer maps
    /// this to a `status=UNKNOWN` answer rather than an error).
    pub async fn get_task(&self, id: Uuid) -> Option<TaskRecord> {
        self.store.get(id).await
    }

    /// `get_tasks`: attribute-equality filter query.
    pub async fn get_tasks(&self, filter: TaskFilter) -> Vec<TaskRecord> {
        self.store.filter(filter).await
    }

    /// `job_list`: lightweight descriptor summaries, optionally
    /// narrowed to `jobnames`.
    pub fn job_list(&self, jobnames: Option<&[String]>) -> Vec<JobSummary> {
        self.registry.list(jobnames)
    }

    /// `next_scheduled`: seconds until each periodic job's next run,
    /// optionally narrowed to `jobnames`.
    pub fn next_scheduled(&self, jobnames: Option<&[String]>) -> Vec<NextScheduled> {
        let now = chrono::Utc::now();
        self.registry
            .periodic()
            .into_iter()
            .filter(|d| jobnames.is_none_or(|names| names.iter().any(|n| n == &d.name)))
            .map(|d| NextScheduled {
                seconds_until_next: (self.scheduler.next_run_for(&d.name).unwrap_or(now) - now)
                    .num_seconds(),
                job: d.name.clone(),
            })
            .collect()
    }

    /// `delete_tasks`: remove records by id, returning the count
    /// actually removed.
    pub async fn delete_tasks(&self, ids: &[Uuid]) -> usize {
        self.store.delete(ids).await
    }

    /// `wait_for_task`: block until the task reaches a ready state or
    /// `timeout` elapses.
    pub async fn wait_for_task(
        &self,
        id: Uuid,
        timeout: Duration,
    ) -> Result<TaskRecord, StoreError> {
        self.store.wait_for_terminal(id, timeout).await
    }

    /// Advance the scheduler by one tick (materialize due periodic
    /// jobs, run the reaper). Intended to be called on a fixed
    /// interval by the monitor binary's event loop.
    pub async fn tick(&self) -> Result<(), SchedulerError> {
        self.scheduler.tick().await
    }

    /// Run the tick loop until cancelled. Skips ticks cheaply between
    /// `next_run()` and the fixed poll interval, since the scheduler
    /// only needs to materialize something once its next due instant
    /// arrives.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        info!(
            interval_ms = interval.as_millis() as u64,
            "monitor tick loop starting"
        );
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "scheduler tick failed");
            }
        }
    }
}
