//! Sample jobs used by the `monitor`/`worker` binaries and the
//! integration tests: deliberately simple, mirroring the scenarios in
//! `SPEC_FULL.md` §8.

use serde_json::{Map, Value};

use crate::job::{Job, JobFuture, TaskContext};

/// `Addition(a, b) -> a + b`. Used by scenario S1.
pub struct Addition;

impl Job for Addition {
    fn call(&self, ctx: TaskContext, args: Vec<Value>, _kwargs: Map<String, Value>) -> JobFuture {
        Box::pin(async move {
            ctx.progress("adding arguments");
            let sum: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
            Ok(Value::from(sum))
        })
    }
}

/// `Sleeper(n)`: sleeps `n` seconds. Used by scenario S2 to exercise
/// the worker's timeout path when paired with a short descriptor
/// timeout.
pub struct Sleeper;

impl Job for Sleeper {
    fn call(&self, ctx: TaskContext, args: Vec<Value>, _kwargs: Map<String, Value>) -> JobFuture {
        Box::pin(async move {
            let seconds = args.first().and_then(|v| v.as_u64()).unwrap_or(0);
            ctx.progress(&format!("sleeping {seconds}s"));
            tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
            Ok(Value::Null)
        })
    }
}

/// A job that always fails, with a caller-supplied message. Used by
/// scenario S3.
pub struct AlwaysFails;

impl Job for AlwaysFails {
    fn call(&self, _ctx: TaskContext, args: Vec<Value>, _kwargs: Map<String, Value>) -> JobFuture {
        Box::pin(async move {
            let message = args
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or("job raised an error")
                .to_string();
            Err(message)
        })
    }

    fn is_retriable(&self, _error: &str) -> bool {
        false
    }
}

/// A periodic heartbeat job, scheduled on a fixed interval. Used to
/// exercise scenario S4 (coalesced catch-up).
pub struct Heartbeat;

impl Job for Heartbeat {
    fn call(&self, ctx: TaskContext, _args: Vec<Value>, _kwargs: Map<String, Value>) -> JobFuture {
        Box::pin(async move {
            ctx.progress("heartbeat");
            Ok(Value::Null)
        })
    }
}
