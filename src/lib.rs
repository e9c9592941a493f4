//! A distributed task queue core: job registry, task store and
//! lifecycle state machine, in-process queue, periodic scheduler, and
//! worker dispatch loop.

pub mod config;
pub mod demo_jobs;
pub mod errors;
pub mod job;
pub mod monitor;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod task;
pub mod worker;

pub use job::{Job, JobDescriptor, JobFuture, JobOutput, Schedule, TaskContext};
pub use monitor::Monitor;
pub use queue::{InProcessQueue, Message, Queue, QueueConsumer, SharedConsumer};
pub use registry::{JobRegistry, JobRegistryBuilder, JobSummary, SharedJobRegistry};
pub use task::{
    InMemoryTaskStore, RevokedReason, SharedTaskStore, TaskFilter, TaskPatch, TaskRecord,
    TaskResult, TaskStatus, TaskStore,
};
pub use worker::{Worker, WorkerConfig};
