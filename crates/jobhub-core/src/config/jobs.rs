//! Job system configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which broker and scheduler pair the job system runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// Single-process queues and timers.
    #[default]
    Memory,
    /// Redis lists and sorted sets shared by a fleet of processes.
    Redis,
}

/// Job system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Broker/scheduler backend.
    #[serde(default)]
    pub broker: BrokerKind,
    /// Redis connection URL, used when `broker = "redis"`.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Global soft cap on in-flight executions across all worker types (0 = none).
    #[serde(default)]
    pub slots: usize,
    /// Deadline for graceful shutdown, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
    /// Number of event dispatch loops of the Redis scheduler.
    #[serde(default = "default_event_dispatchers")]
    pub event_dispatchers: usize,
    /// Per worker-type overrides.
    #[serde(default)]
    pub workers: HashMap<String, WorkerOverride>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            broker: BrokerKind::default(),
            redis_url: default_redis_url(),
            slots: 0,
            shutdown_timeout_seconds: default_shutdown_timeout(),
            event_dispatchers: default_event_dispatchers(),
            workers: HashMap::new(),
        }
    }
}

/// Overrides applied on top of a registered worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerOverride {
    /// Number of concurrent consumers; 0 disables the worker on this process.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Maximum number of executions of one job.
    #[serde(default)]
    pub max_exec_count: Option<u32>,
    /// Execution timeout in seconds.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_event_dispatchers() -> usize {
    50
}
