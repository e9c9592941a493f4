//! The scheduler: materializes periodic jobs into tasks, answers
//! ad-hoc task-creation commands, and runs the reaper.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::SchedulerError;
use crate::queue::{Message, Queue};
use crate::registry::SharedJobRegistry;
use crate::task::{RevokedReason, TaskFilter, TaskPatch, TaskRecord, TaskStatus};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Per periodic job: the calendar's memory of when it last ran and
/// when it's next due. Ephemeral — reset on restart.
#[derive(Debug, Clone, Copy)]
struct CalendarEntry {
    last_run_at: Option<DateTime<Utc>>,
    next_run_at: DateTime<Utc>,
}

/// Owns the periodic-job calendar and a reference to the store and
/// queue. Shared behind an `Arc` by the monitor and exposed to the
/// command surface.
pub struct Scheduler {
    registry: SharedJobRegistry,
    store: crate::task::SharedTaskStore,
    queue: std::sync::Arc<dyn Queue>,
    calendar: Mutex<HashMap<String, CalendarEntry>>,
}

impl Scheduler {
    pub fn new(
        registry: SharedJobRegistry,
        store: crate::task::SharedTaskStore,
        queue: std::sync::Arc<dyn Queue>,
    ) -> Self {
        let now = Utc::now();
        let calendar = registry
            .periodic()
            .into_iter()
            .map(|d| {
                (
                    d.name.clone(),
                    CalendarEntry {
                        last_run_at: None,
                        next_run_at: now,
                    },
                )
            })
            .collect();
        Self {
            registry,
            store,
            queue,
            calendar: Mutex::new(calendar),
        }
    }

    /// The scheduler's own `next_run`: the minimum `next_run_at` across
    /// the calendar. The monitor uses this to skip ticks cheaply.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.calendar
            .lock()
            .unwrap()
            .values()
            .map(|e| e.next_run_at)
            .min()
    }

    /// The next scheduled run for one specific periodic job, or `None`
    /// if `name` isn't a registered periodic job. The command surface
    /// uses this for `next_scheduled`, where each job reports its own
    /// due time rather than the calendar-wide minimum.
    pub fn next_run_for(&self, name: &str) -> Option<DateTime<Utc>> {
        self.calendar
            .lock()
            .unwrap()
            .get(name)
            .map(|e| e.next_run_at)
    }

    /// Create a task for `name`, applying the overlap guard. Returns
    /// the existing record instead of creating a new one when
    /// `can_overlap` is false and a conflicting task is already
    /// in flight.
    pub async fn queue_task(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<TaskRecord, SchedulerError> {
        let descriptor = self.registry.lookup(name)?;

        if !descriptor.can_overlap {
            let existing = self
                .store
                .filter(TaskFilter {
                    name: Some(name.to_string()),
                    status: None,
                })
                .await
                .into_iter()
                .find(|t| t.conflicts_with(name, &args));
            if let Some(task) = existing {
                debug!(task_id = %task.id, %name, "overlap guard returned existing task");
                return Ok(task);
            }
        }

        let now = Utc::now();
        let record = TaskRecord::builder()
            .name(name.to_string())
            .args(args)
            .kwargs(kwargs)
            .expiry(now + chrono::Duration::seconds(descriptor.timeout_secs as i64))
            .timeout_secs(descriptor.timeout_secs)
            .build();

        let created = self.store.create(record).await?;
        self.store.on_created(&created).await;
        self.queue.put(Message::request(created.id))?;
        info!(task_id = %created.id, %name, "task queued");
        Ok(created)
    }

    /// Advance the periodic calendar and run the reaper. Idempotent
    /// against being called more often than required: each calendar
    /// entry materializes at most once per scheduled instant.
    pub async fn tick(&self) -> Result<(), SchedulerError> {
        let now = Utc::now();
        let due: Vec<String> = {
            let calendar = self.calendar.lock().unwrap();
            let mut names: Vec<String> = calendar
                .iter()
                .filter(|(_, entry)| entry.next_run_at <= now)
                .map(|(name, _)| name.clone())
                .collect();
            // registration-order tie-break: `JobRegistry::periodic` already
            // returns a deterministic (name-sorted) order, re-derive it here.
            names.sort();
            names
        };

        for name in due {
            let descriptor = match self.registry.lookup(&name) {
                Ok(d) => d,
                Err(e) => {
                    warn!(%name, error = %e, "periodic job vanished from registry");
                    continue;
                }
            };
            self.queue_task(
                &name,
                descriptor.default_args.clone(),
                descriptor.default_kwargs.clone(),
            )
            .await?;

            let mut calendar = self.calendar.lock().unwrap();
            if let Some(entry) = calendar.get_mut(&name) {
                // Coalesce: even if several intervals were missed while
                // paused, compute the *next* occurrence from `now`, not
                // from the missed `next_run_at`, so only one catch-up
                // task is materialized.
                let next = descriptor
                    .schedule
                    .as_ref()
                    .expect("periodic descriptor always carries a schedule")
                    .next_after(now, entry.last_run_at)
                    .map_err(|source| SchedulerError::InvalidSchedule {
                        rule: name.clone(),
                        source,
                    })?;
                entry.last_run_at = Some(now);
                entry.next_run_at = next;
            }
        }

        self.reap().await;
        Ok(())
    }

    /// Transition any `STARTED` task whose `time_start + timeout` has
    /// elapsed to `REVOKED(WorkerLost)`. Covers a worker crashing
    /// mid-task without ever reporting back.
    async fn reap(&self) {
        let now = Utc::now();
        let started = self
            .store
            .filter(TaskFilter {
                name: None,
                status: Some(TaskStatus::Started),
            })
            .await;

        for task in started {
            let Some(time_start) = task.time_start else {
                continue;
            };
            let deadline = time_start + chrono::Duration::seconds(task.timeout_secs as i64);
            if now > deadline {
                warn!(task_id = %task.id, "reaper revoking task with lost worker");
                let result = self
                    .store
                    .update(
                        task.id,
                        TaskPatch {
                            status: TaskStatus::Revoked,
                            result: None,
                            revoked_reason: Some(RevokedReason::WorkerLost),
                        },
                    )
                    .await;
                if let Ok(task) = result {
                    self.store.on_finish(&task).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobDescriptor, JobFuture, Schedule, TaskContext};
    use crate::queue::InProcessQueue;
    use crate::registry::JobRegistryBuilder;
    use crate::task::{InMemoryTaskStore, TaskStore};
    use std::sync::Arc;

    struct Addition;
    impl Job for Addition {
        fn call(
            &self,
            _ctx: TaskContext,
            args: Vec<Value>,
            _kwargs: Map<String, Value>,
        ) -> JobFuture {
            Box::pin(async move {
                let sum: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
                Ok(Value::from(sum))
            })
        }
    }

    fn scheduler_with(
        descriptor: JobDescriptor,
    ) -> (
        Scheduler,
        Arc<InMemoryTaskStore>,
        crate::queue::InProcessConsumer,
    ) {
        let mut builder = JobRegistryBuilder::new();
        builder.register(descriptor).unwrap();
        let registry = Arc::new(builder.build());
        let store = Arc::new(InMemoryTaskStore::new());
        let (queue, consumer) = InProcessQueue::new(16);
        let scheduler = Scheduler::new(registry, store.clone(), Arc::new(queue));
        (scheduler, store, consumer)
    }

    #[tokio::test]
    async fn queue_task_creates_a_pending_record() {
        let (scheduler, _store, _consumer) = scheduler_with(JobDescriptor {
            name: "Addition".into(),
            job: Box::new(Addition),
            schedule: None,
            default_args: vec![],
            default_kwargs: Map::new(),
            timeout_secs: 30,
            can_overlap: true,
            max_retries: 0,
        });

        let task = scheduler
            .queue_task("Addition", vec![2.into(), 3.into()], Map::new())
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn overlap_guard_returns_existing_task() {
        let (scheduler, _store, _consumer) = scheduler_with(JobDescriptor {
            name: "Addition".into(),
            job: Box::new(Addition),
            schedule: None,
            default_args: vec![],
            default_kwargs: Map::new(),
            timeout_secs: 30,
            can_overlap: false,
            max_retries: 0,
        });

        let first = scheduler
            .queue_task("Addition", vec![2.into()], Map::new())
            .await
            .unwrap();
        let second = scheduler
            .queue_task("Addition", vec![2.into()], Map::new())
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn tick_coalesces_missed_periodic_runs() {
        let (scheduler, store, _consumer) = scheduler_with(JobDescriptor {
            name: "Heartbeat".into(),
            job: Box::new(Addition),
            schedule: Some(Schedule::Interval(chrono::Duration::seconds(1))),
            default_args: vec![],
            default_kwargs: Map::new(),
            timeout_secs: 30,
            can_overlap: true,
            max_retries: 0,
        });

        // Simulate the calendar having fallen behind by forcing next_run_at
        // far into the past, as if several ticks were missed while paused.
        {
            let mut calendar = scheduler.calendar.lock().unwrap();
            let entry = calendar.get_mut("Heartbeat").unwrap();
            entry.next_run_at = Utc::now() - chrono::Duration::seconds(10);
        }

        scheduler.tick().await.unwrap();
        scheduler.tick().await.unwrap();

        let tasks = store
            .filter(TaskFilter {
                name: Some("Heartbeat".into()),
                status: None,
            })
            .await;
        assert_eq!(tasks.len(), 1, "only one catch-up task should materialize");
    }
}
