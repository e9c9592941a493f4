//! Error kinds raised by the task queue core.
//!
//! Each concern (registry, store, queue, scheduler, worker) gets its own
//! error enum so callers can match on kind rather than parse strings.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the [`crate::registry::JobRegistry`].
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job already registered: {0}")]
    Duplicate(String),
}

/// Errors raised by a [`crate::task::store::TaskStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(Uuid),

    #[error("task already exists: {0}")]
    Duplicate(Uuid),

    #[error("illegal transition for task {id}: {from:?} -> {to:?}")]
    IllegalTransition {
        id: Uuid,
        from: crate::task::TaskStatus,
        to: crate::task::TaskStatus,
    },

    #[error("timed out waiting for task {0} to reach a terminal state")]
    Timeout(Uuid),
}

/// Errors raised by a [`crate::queue::Queue`] implementation.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue is at capacity")]
    Full,

    #[error("queue is closed")]
    Closed,
}

/// Errors raised by the worker dispatch loop outside of a job's own
/// failure (which is captured as the task's `result`, not propagated
/// here).
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors raised by the [`crate::scheduler::Scheduler`].
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("invalid recurrence rule {rule:?}: {source}")]
    InvalidSchedule {
        rule: String,
        #[source]
        source: anyhow::Error,
    },
}
