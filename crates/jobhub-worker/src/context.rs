//! Execution context handed to worker functions.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use jobhub_core::events::Event;
use jobhub_core::Prefix;
use jobhub_entity::job::Job;

use crate::error::{JobError, JobResult};

/// Context of one job execution.
///
/// The cancellation token is renewed for every attempt; it is cancelled when
/// the attempt times out or when the pool is forced down.
#[derive(Debug)]
pub struct WorkerContext {
    job: Job,
    attempt: u32,
    cancel: CancellationToken,
    no_retry: AtomicBool,
    cookie: Option<Arc<dyn Any + Send + Sync>>,
}

impl WorkerContext {
    /// Context for a job, cancelled with `cancel`.
    pub fn new(job: Job, cancel: CancellationToken) -> Self {
        Self {
            job,
            attempt: 0,
            cancel,
            no_retry: AtomicBool::new(false),
            cookie: None,
        }
    }

    pub(crate) fn begin_attempt(&mut self, attempt: u32, cancel: CancellationToken) {
        self.attempt = attempt;
        self.cancel = cancel;
    }

    /// The job being executed.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Tenant of the job.
    pub fn prefix(&self) -> &Prefix {
        &self.job.prefix
    }

    /// Job identifier.
    pub fn id(&self) -> &str {
        &self.job.id
    }

    /// Trigger that produced the job.
    pub fn trigger_id(&self) -> Option<&str> {
        self.job.trigger_id.as_deref()
    }

    /// Current attempt, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Decode the job message.
    pub fn message<T: DeserializeOwned>(&self) -> JobResult<T> {
        let message = self
            .job
            .message
            .as_ref()
            .ok_or_else(|| JobError::MalformedMessage("job has no message".to_string()))?;
        message
            .unmarshal()
            .map_err(|e| JobError::MalformedMessage(e.to_string()))
    }

    /// Decode the realtime event that caused the job.
    pub fn event(&self) -> JobResult<Event> {
        let event = self
            .job
            .event
            .as_ref()
            .ok_or_else(|| JobError::MalformedEvent("job has no event".to_string()))?;
        event
            .unmarshal()
            .map_err(|e| JobError::MalformedEvent(e.to_string()))
    }

    /// Resolves when the attempt is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Whether the attempt is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Forbid further attempts, whatever the error.
    pub fn set_no_retry(&self) {
        self.no_retry.store(true, Ordering::Relaxed);
    }

    /// Whether [`WorkerContext::set_no_retry`] was called.
    pub fn no_retry(&self) -> bool {
        self.no_retry.load(Ordering::Relaxed)
    }

    /// Attach per-job state, typically from [`JobHandler::start`](crate::executor::JobHandler::start).
    pub fn set_cookie<T: Any + Send + Sync>(&mut self, value: T) {
        self.cookie = Some(Arc::new(value));
    }

    /// State attached with [`WorkerContext::set_cookie`].
    pub fn cookie<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.cookie.as_deref().and_then(|c| c.downcast_ref::<T>())
    }
}
