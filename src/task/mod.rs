//! The task lifecycle: records, the state machine, and the store trait.

pub mod record;
pub mod store;

pub use record::{RevokedReason, TaskRecord, TaskResult, TaskStatus};
pub use store::{InMemoryTaskStore, SharedTaskStore, TaskFilter, TaskPatch, TaskStore};
