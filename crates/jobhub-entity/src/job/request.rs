//! Job requests.

use serde::{Deserialize, Serialize};

use super::message::Message;
use super::options::JobOptions;

/// The input used to create a job. Never persisted on its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    /// Worker type that will execute the job.
    pub worker_type: String,
    /// Trigger that produced the request.
    pub trigger_id: Option<String>,
    /// Job payload.
    pub message: Option<Message>,
    /// Realtime event that caused the request.
    pub event: Option<Message>,
    /// Execution options.
    pub options: Option<JobOptions>,
    /// Requested by a person rather than a schedule.
    pub manual: bool,
    /// Produced after a debounce window.
    pub debounced: bool,
    /// Issued with administrator rights.
    pub admin: bool,
}

impl JobRequest {
    /// Create a request for a worker type.
    pub fn new(worker_type: impl Into<String>, message: Option<Message>) -> Self {
        Self {
            worker_type: worker_type.into(),
            message,
            ..Default::default()
        }
    }
}
