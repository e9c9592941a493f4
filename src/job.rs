//! The job callable contract.
//!
//! A job is a named, reusable unit of work. The worker invokes it with
//! a [`TaskContext`] plus the bound positional/keyed arguments, and
//! expects back a JSON value or an error.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::Span;
use uuid::Uuid;

/// Passed to every job callable as its first argument. Mirrors the
/// original `TaskConsumer`: the worker, the task identity, and a place
/// to log progress, without exposing the store directly.
pub struct TaskContext {
    pub task_id: Uuid,
    pub attempt: u32,
    pub span: Span,
}

impl TaskContext {
    pub fn new(task_id: Uuid, attempt: u32) -> Self {
        Self {
            task_id,
            attempt,
            span: tracing::info_span!("task", id = %task_id, attempt),
        }
    }

    /// Emit an intermediate progress note, scoped to this task's span.
    pub fn progress(&self, message: &str) {
        let _enter = self.span.enter();
        tracing::info!(message, "task progress");
    }
}

pub type JobOutput = Result<Value, String>;
pub type JobFuture = Pin<Box<dyn Future<Output = JobOutput> + Send>>;

/// A named, reusable unit of work.
pub trait Job: Send + Sync {
    /// Invoke the job with its bound arguments.
    fn call(&self, ctx: TaskContext, args: Vec<Value>, kwargs: Map<String, Value>) -> JobFuture;

    /// Whether an error returned from `call` should be retried (subject
    /// to the descriptor's `max_retries`). Defaults to retriable, since
    /// most job failures are transient (I/O, timeouts).
    fn is_retriable(&self, _error: &str) -> bool {
        true
    }
}

/// A job's recurrence: either a fixed interval or an RFC-5545 rule.
#[derive(Debug, Clone)]
pub enum Schedule {
    Interval(chrono::Duration),
    Rrule(String),
}

impl Schedule {
    /// The first occurrence strictly after `now`.
    pub fn next_after(
        &self,
        now: DateTime<Utc>,
        last_run_at: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>, anyhow::Error> {
        match self {
            Schedule::Interval(interval) => Ok(last_run_at.unwrap_or(now) + *interval),
            Schedule::Rrule(rule) => {
                let dtstart = last_run_at.unwrap_or(now);
                let full = format!(
                    "DTSTART:{}\nRRULE:{}",
                    dtstart.format("%Y%m%dT%H%M%SZ"),
                    rule
                );
                let set: rrule::RRuleSet = full.parse()?;
                let start = now.with_timezone(&rrule::Tz::UTC);
                let result = set.after(start).all(1);
                result
                    .dates
                    .first()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or_else(|| {
                        anyhow::anyhow!("recurrence rule produced no further occurrences")
                    })
            }
        }
    }
}

/// Immutable metadata describing a registered job. Created once at
/// registry build time.
pub struct JobDescriptor {
    pub name: String,
    pub job: Box<dyn Job>,
    pub schedule: Option<Schedule>,
    pub default_args: Vec<Value>,
    pub default_kwargs: Map<String, Value>,
    pub timeout_secs: u64,
    pub can_overlap: bool,
    pub max_retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn interval_schedule_adds_to_last_run() {
        let schedule = Schedule::Interval(Duration::seconds(60));
        let last_run = Utc::now();
        let next = schedule.next_after(last_run, Some(last_run)).unwrap();
        assert_eq!(next, last_run + Duration::seconds(60));
    }

    #[test]
    fn rrule_schedule_resolves_next_occurrence() {
        let schedule = Schedule::Rrule("FREQ=SECONDLY;INTERVAL=1".to_string());
        let now = Utc::now();
        let next = schedule.next_after(now, None).unwrap();
        assert!(next > now);
    }
}
