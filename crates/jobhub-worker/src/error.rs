//! Job system errors.

use std::time::Duration;

use thiserror::Error;

use jobhub_core::AppError;

/// Errors of the job system.
///
/// Some variants are sentinels a worker function returns to steer the retry
/// loop: [`JobError::Abort`], [`JobError::BadTrigger`],
/// [`JobError::MalformedMessage`] and [`JobError::MalformedEvent`] stop it
/// immediately.
#[derive(Debug, Error)]
pub enum JobError {
    /// No worker is registered for the type, or it is admin-only.
    #[error("Unknown worker type: {0}")]
    UnknownWorker(String),

    /// A worker type was registered twice.
    #[error("Worker type already registered: {0}")]
    DuplicateWorker(String),

    /// Registration attempted after the job system started.
    #[error("Worker registry is frozen once the job system has started")]
    RegistryFrozen,

    /// The trigger type discriminator is not one of the known variants.
    #[error("Unknown trigger type: {0}")]
    UnknownTrigger(String),

    /// The trigger arguments do not parse for its type.
    #[error("Malformed trigger arguments: {0}")]
    MalformedTrigger(String),

    /// No such trigger.
    #[error("Trigger not found: {0}")]
    NotFoundTrigger(String),

    /// No such job.
    #[error("Job not found: {0}")]
    NotFoundJob(String),

    /// The worker gave up on the job; acknowledged as a success.
    #[error("Job aborted")]
    Abort,

    /// The trigger produced a job that can never succeed.
    #[error("Bad trigger: {0}")]
    BadTrigger(String),

    /// The job message cannot be decoded.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The job event cannot be decoded.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// The attempt exceeded its timeout.
    #[error("Job execution timed out after {0:?}")]
    Timeout(Duration),

    /// The worker function panicked.
    #[error("Job panicked: {0}")]
    Panicked(String),

    /// The queue or broker is closed.
    #[error("Queue is closed")]
    Closed,

    /// Shutdown did not complete before its deadline.
    #[error("Shutdown did not complete before the deadline")]
    ShutdownTimeout,

    /// The operation is not available on this backend.
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// Redis failure.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Error returned by a worker function.
    #[error("{0}")]
    Execution(String),

    /// Store or configuration failure.
    #[error(transparent)]
    App(#[from] AppError),
}

impl JobError {
    /// Build an execution error from any message.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Abort | Self::BadTrigger(_) | Self::MalformedMessage(_) | Self::MalformedEvent(_)
        )
    }

    /// Whether this is the abort sentinel.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort)
    }

    /// Whether the owning trigger must be deleted.
    pub fn is_bad_trigger(&self) -> bool {
        matches!(self, Self::BadTrigger(_))
    }
}

/// Result alias for job system operations.
pub type JobResult<T> = Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(JobError::execution("boom").is_retryable());
        assert!(JobError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(JobError::Panicked("oops".into()).is_retryable());
        assert!(!JobError::Abort.is_retryable());
        assert!(!JobError::MalformedMessage("x".into()).is_retryable());
        assert!(JobError::BadTrigger("gone".into()).is_bad_trigger());
        assert!(JobError::Abort.is_abort());
    }
}
