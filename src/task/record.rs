//! The task record: the central entity tracked by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Lifecycle states a task can occupy. See the state machine in
/// `SPEC_FULL.md` §4.6 for the legal transition graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    Retry,
    Received,
    Started,
    Revoked,
    Failure,
    Success,
    /// Only ever produced as a query answer for a missing record, never
    /// stored.
    Unknown,
}

impl TaskStatus {
    /// `FULL_RUN_STATES`: the task actually ran to completion.
    pub fn is_full_run(self) -> bool {
        matches!(self, TaskStatus::Failure | TaskStatus::Success)
    }

    /// `READY_STATES`: the task has finished, one way or another.
    pub fn is_ready(self) -> bool {
        matches!(
            self,
            TaskStatus::Revoked | TaskStatus::Failure | TaskStatus::Success
        )
    }

    /// Whether `self -> next` is a legal transition per the state machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Received)
                | (Pending, Revoked)
                | (Received, Started)
                | (Received, Revoked)
                | (Started, Success)
                | (Started, Failure)
                | (Started, Retry)
                | (Started, Revoked)
                | (Retry, Received)
        )
    }
}

/// Why a task was revoked. Distinct from `status` so callers can tell
/// an expired task from a timed-out one without parsing `result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevokedReason {
    /// The task's `expiry` passed before a worker picked it up.
    Expired,
    /// The job callable exceeded its execution timeout.
    Timeout,
    /// The reaper observed a worker crash mid-task.
    WorkerLost,
    /// An explicit caller-supplied revocation.
    Requested(String),
}

/// The outcome of a terminal task, carried in `result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskResult {
    Value(serde_json::Value),
    Error(String),
}

/// A single invocation of a job with bound arguments and a lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct TaskRecord {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub name: String,

    #[builder(default)]
    pub args: Vec<serde_json::Value>,
    #[builder(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,

    #[builder(default)]
    pub status: TaskStatus,

    #[builder(default = Utc::now())]
    pub time_executed: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub time_start: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub time_end: Option<DateTime<Utc>>,

    pub expiry: DateTime<Utc>,
    pub timeout_secs: u64,

    #[builder(default, setter(strip_option))]
    pub result: Option<TaskResult>,
    #[builder(default, setter(strip_option))]
    pub revoked_reason: Option<RevokedReason>,

    #[builder(default, setter(strip_option))]
    pub from_task: Option<Uuid>,

    #[builder(default)]
    pub retry_count: u32,
}

impl TaskRecord {
    /// Apply a status transition, enforcing the state machine and the
    /// timestamp invariants. Terminal records refuse every transition.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), crate::errors::StoreError> {
        if self.status.is_ready() {
            return Err(crate::errors::StoreError::IllegalTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        if !self.status.can_transition_to(next) {
            return Err(crate::errors::StoreError::IllegalTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }

        match next {
            TaskStatus::Started => self.time_start = Some(Utc::now()),
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Revoked => {
                self.time_end = Some(Utc::now())
            }
            TaskStatus::Retry => self.retry_count += 1,
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    /// Whether this record is in a non-terminal state with the same
    /// job name and args as `other` — used by the overlap guard.
    pub fn conflicts_with(&self, name: &str, args: &[serde_json::Value]) -> bool {
        !self.status.is_ready() && self.name == name && self.args == args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TaskRecord {
        TaskRecord::builder()
            .name("Addition")
            .expiry(Utc::now() + chrono::Duration::seconds(60))
            .timeout_secs(30u64)
            .build()
    }

    #[test]
    fn legal_path_succeeds() {
        let mut task = sample();
        task.transition(TaskStatus::Received).unwrap();
        task.transition(TaskStatus::Started).unwrap();
        task.transition(TaskStatus::Success).unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert!(task.time_start.is_some());
        assert!(task.time_end.is_some());
    }

    #[test]
    fn retry_cycles_back_to_received() {
        let mut task = sample();
        task.transition(TaskStatus::Received).unwrap();
        task.transition(TaskStatus::Started).unwrap();
        task.transition(TaskStatus::Retry).unwrap();
        assert_eq!(task.status, TaskStatus::Retry);
        assert_eq!(task.retry_count, 1);
        task.transition(TaskStatus::Received).unwrap();
        assert_eq!(task.status, TaskStatus::Received);
    }

    #[test]
    fn terminal_state_is_immutable() {
        let mut task = sample();
        task.transition(TaskStatus::Received).unwrap();
        task.transition(TaskStatus::Started).unwrap();
        task.transition(TaskStatus::Success).unwrap();
        assert!(task.transition(TaskStatus::Failure).is_err());
    }

    #[test]
    fn illegal_jump_is_rejected() {
        let mut task = sample();
        assert!(task.transition(TaskStatus::Started).is_err());
    }
}
