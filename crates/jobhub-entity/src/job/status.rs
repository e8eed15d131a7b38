//! Job state enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a job. Transitions only go forward:
/// `Queued -> Running -> Done | Errored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting in a queue for a worker.
    Queued,
    /// Picked up by a worker.
    Running,
    /// Successfully completed.
    Done,
    /// Failed after the last attempt.
    Errored,
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Errored)
    }

    /// Return the state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
