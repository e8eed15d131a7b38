//! Per-job execution options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options overriding the worker configuration for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Maximum number of executions; `None` keeps the worker's value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_exec_count: Option<u32>,
    /// Total time budget across all attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_exec_time: Option<Duration>,
    /// Timeout of one attempt. The effective timeout is the smaller of this
    /// and the worker's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}
