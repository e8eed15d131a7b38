//! The `log` worker: writes the message of each job to the log.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::WorkerContext;
use crate::error::JobResult;
use crate::executor::JobHandler;

/// Worker type name of [`LogWorker`].
pub const WORKER_TYPE: &str = "log";

/// Logs the decoded message of its jobs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWorker;

#[async_trait]
impl JobHandler for LogWorker {
    async fn execute(&self, ctx: &WorkerContext) -> JobResult<()> {
        let message: Value = if ctx.job().message.is_some() {
            ctx.message()?
        } else {
            Value::Null
        };
        tracing::info!(
            prefix = %ctx.prefix(),
            trigger_id = ctx.trigger_id().unwrap_or_default(),
            message = %message,
            "Log job"
        );
        Ok(())
    }
}
