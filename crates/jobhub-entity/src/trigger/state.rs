//! Execution summary of a trigger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the most recent job of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    /// No job was ever produced.
    #[default]
    NeverRun,
    /// Last job succeeded.
    Done,
    /// Last job failed.
    Errored,
    /// Last job is executing.
    Running,
    /// Last job waits in a queue.
    Queued,
}

/// Execution summary computed from the most recent jobs of a trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerState {
    /// Trigger identifier.
    pub trigger_id: String,
    /// Status of the latest job.
    pub status: TriggerStatus,
    /// Finish time of the latest successful job.
    pub last_success: Option<DateTime<Utc>>,
    /// Latest successful job.
    pub last_successful_job_id: Option<String>,
    /// Queue time of the latest job.
    pub last_execution: Option<DateTime<Utc>>,
    /// Latest job.
    pub last_executed_job_id: Option<String>,
    /// Finish time of the latest failed job.
    pub last_failure: Option<DateTime<Utc>>,
    /// Latest failed job.
    pub last_failed_job_id: Option<String>,
    /// Error of the latest failed job.
    pub last_error: Option<String>,
    /// Queue time of the latest manual job.
    pub last_manual_execution: Option<DateTime<Utc>>,
    /// Latest manual job.
    pub last_manual_job_id: Option<String>,
}
