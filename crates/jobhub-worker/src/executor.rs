//! The trait a worker type implements.

use async_trait::async_trait;

use jobhub_entity::job::Job;

use crate::context::WorkerContext;
use crate::error::{JobError, JobResult};

/// Worker function and lifecycle hooks of one worker type.
///
/// Only [`JobHandler::execute`] is required; the hooks default to no-ops.
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug + 'static {
    /// Called once when the job system starts, before any job runs.
    async fn init(&self) -> JobResult<()> {
        Ok(())
    }

    /// Filter called before a job is persisted and queued. Returning `false`
    /// silently skips the job.
    fn before_enqueue(&self, _job: &Job) -> bool {
        true
    }

    /// Called once per job before the first attempt. May stash state in the
    /// context with [`WorkerContext::set_cookie`].
    async fn start(&self, _ctx: &mut WorkerContext) -> JobResult<()> {
        Ok(())
    }

    /// Execute one attempt of the job.
    async fn execute(&self, ctx: &WorkerContext) -> JobResult<()>;

    /// Whether a failed attempt may be retried. Only consulted for
    /// retryable errors.
    fn should_retry(&self, _err: &JobError) -> bool {
        true
    }

    /// Called once after the last attempt with its error, if any. Errors are
    /// logged and otherwise ignored.
    async fn commit(&self, _ctx: &WorkerContext, _result: Option<&JobError>) -> JobResult<()> {
        Ok(())
    }
}
