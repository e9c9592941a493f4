//! Runtime configuration, loaded from `.env` plus CLI flags.

use clap::Parser;

/// Configuration shared by the monitor and worker binaries.
///
/// Environment variables are loaded first (via `dotenvy`), then `clap`
/// overlays any flags passed on the command line.
#[derive(Debug, Clone, Parser)]
#[command(name = "taskqueue", about = "Distributed task queue core")]
pub struct Config {
    /// Per-worker concurrent in-flight task cap.
    #[arg(long, env = "TASKQUEUE_BACKLOG", default_value_t = 1)]
    pub backlog: usize,

    /// Default task execution timeout, in seconds.
    #[arg(long, env = "TASKQUEUE_TIMEOUT", default_value_t = 3600)]
    pub timeout_secs: u64,

    /// Number of worker tasks to spawn.
    #[arg(long, env = "TASKQUEUE_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Bounded queue capacity between the scheduler and the workers.
    #[arg(long, env = "TASKQUEUE_QUEUE_CAPACITY", default_value_t = 256)]
    pub queue_capacity: usize,

    /// How often the monitor ticks the scheduler, in milliseconds.
    #[arg(long, env = "TASKQUEUE_TICK_MS", default_value_t = 500)]
    pub tick_interval_ms: u64,
}

impl Config {
    /// Load `.env` (if present) then parse CLI args/environment via `clap`.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Config::parse()
    }
}
