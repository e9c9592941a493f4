//! Worker binary: runs a pool of worker dispatch loops against the job
//! registry, task store and queue.
//!
//! The default queue and store backends are in-process, so a worker
//! launched as a separate OS process has nothing to share a channel
//! with. This binary boots the same components the `monitor` binary
//! does and also drives the scheduler tick loop, standing in for a
//! deployment where `worker` instances are replicated against a real
//! out-of-process queue/store backend (see `SPEC_FULL.md` §9 Design
//! Notes) while the command surface lives elsewhere.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Map;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskqueue_core::config::Config;
use taskqueue_core::demo_jobs::{Addition, AlwaysFails, Heartbeat, Sleeper};
use taskqueue_core::job::{JobDescriptor, Schedule};
use taskqueue_core::queue::{InProcessQueue, SharedConsumer};
use taskqueue_core::registry::JobRegistryBuilder;
use taskqueue_core::task::InMemoryTaskStore;
use taskqueue_core::worker::{Worker, WorkerConfig};
use taskqueue_core::Monitor;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,taskqueue_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Config::load();
    tracing::info!(?config, "worker pool starting");

    let mut builder = JobRegistryBuilder::new();
    builder
        .register(JobDescriptor {
            name: "Addition".into(),
            job: Box::new(Addition),
            schedule: None,
            default_args: vec![],
            default_kwargs: Map::new(),
            timeout_secs: config.timeout_secs,
            can_overlap: true,
            max_retries: 0,
        })?
        .register(JobDescriptor {
            name: "Sleeper".into(),
            job: Box::new(Sleeper),
            schedule: None,
            default_args: vec![],
            default_kwargs: Map::new(),
            timeout_secs: 1,
            can_overlap: true,
            max_retries: 0,
        })?
        .register(JobDescriptor {
            name: "AlwaysFails".into(),
            job: Box::new(AlwaysFails),
            schedule: None,
            default_args: vec![],
            default_kwargs: Map::new(),
            timeout_secs: config.timeout_secs,
            can_overlap: true,
            max_retries: 1,
        })?
        .register(JobDescriptor {
            name: "Heartbeat".into(),
            job: Box::new(Heartbeat),
            schedule: Some(Schedule::Interval(chrono::Duration::seconds(30))),
            default_args: vec![],
            default_kwargs: Map::new(),
            timeout_secs: 10,
            can_overlap: false,
            max_retries: 0,
        })?;
    let registry = Arc::new(builder.build());

    let store = Arc::new(InMemoryTaskStore::new());
    let (queue, consumer) = InProcessQueue::new(config.queue_capacity);
    let queue: Arc<dyn taskqueue_core::Queue> = Arc::new(queue);
    let consumer = SharedConsumer::new(consumer);

    let monitor = Arc::new(Monitor::new(registry.clone(), store.clone(), queue.clone()));
    tokio::spawn(monitor.run(Duration::from_millis(config.tick_interval_ms)));

    let mut handles = Vec::new();
    for n in 0..config.workers {
        let worker = Arc::new(Worker::new(
            registry.clone(),
            store.clone(),
            queue.clone(),
            WorkerConfig {
                worker_id: format!("worker-{n}"),
                backlog: config.backlog,
                ..WorkerConfig::default()
            },
        ));
        handles.push(tokio::spawn(worker.run(Box::new(consumer.clone()))));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("worker pool shutting down");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
