//! Worker pool: consumer loops, retry engine, timeouts and panic recovery.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

use jobhub_database::JobRepository;
use jobhub_entity::job::Job;

use crate::context::WorkerContext;
use crate::error::{JobError, JobResult};
use crate::registry::WorkerConfig;
use crate::scheduler::Scheduler;

/// Where a worker pool takes its jobs from.
#[async_trait]
pub trait JobSource: Send + Sync + 'static {
    /// Next job to execute, or `None` once the source is closed or `stop`
    /// is cancelled. A job taken off the queue is always returned: the
    /// caller never drops this future while `stop` is pending.
    async fn next_job(&self, stop: &CancellationToken) -> Option<Job>;
}

/// Delay before the attempt following `failures` failed ones:
/// `base << (failures - 1)`, jittered by up to 10% either way.
pub fn retry_delay(base: Duration, failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(20);
    let delay = base.saturating_mul(1 << shift);
    let jitter: f64 = rand::random_range(-0.1..=0.1);
    delay.mul_f64(1.0 + jitter)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A bounded pool of consumers for one worker type.
#[derive(Debug)]
pub struct Worker {
    inner: Arc<WorkerInner>,
    tracker: TaskTracker,
    stop: CancellationToken,
}

#[derive(Debug)]
struct WorkerInner {
    config: Arc<WorkerConfig>,
    jobs: JobRepository,
    slots: Option<Arc<Semaphore>>,
    scheduler: Option<Weak<dyn Scheduler>>,
    /// Parent of every attempt's cancellation token.
    abort: CancellationToken,
}

impl Worker {
    /// Create a pool. `slots` caps executions across every pool sharing it;
    /// `scheduler` is told to delete triggers producing unprocessable jobs.
    pub fn new(
        config: Arc<WorkerConfig>,
        jobs: JobRepository,
        slots: Option<Arc<Semaphore>>,
        scheduler: Option<Weak<dyn Scheduler>>,
    ) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                config,
                jobs,
                slots,
                scheduler,
                abort: CancellationToken::new(),
            }),
            tracker: TaskTracker::new(),
            stop: CancellationToken::new(),
        }
    }

    /// Worker type of the pool.
    pub fn worker_type(&self) -> &str {
        &self.inner.config.worker_type
    }

    /// Spawn `concurrency` consumer loops on `source`.
    pub fn start(&self, source: Arc<dyn JobSource>) -> JobResult<()> {
        if self.stop.is_cancelled() {
            return Err(JobError::Closed);
        }
        let concurrency = self.inner.config.concurrency;
        info!(worker_type = %self.worker_type(), concurrency, "Starting worker");

        for consumer in 0..concurrency {
            let inner = Arc::clone(&self.inner);
            let stop = self.stop.clone();
            let source = Arc::clone(&source);
            self.tracker.spawn(async move {
                while let Some(job) = source.next_job(&stop).await {
                    inner.process(job).await;
                }
                debug!(worker_type = %inner.config.worker_type, consumer, "Worker consumer stopped");
            });
        }
        Ok(())
    }

    /// Stop taking jobs and wait for the running ones. When `deadline`
    /// elapses, running executions are cancelled and a timeout is reported.
    pub async fn shutdown(&self, deadline: Duration) -> JobResult<()> {
        self.stop.cancel();
        self.tracker.close();
        if tokio::time::timeout(deadline, self.tracker.wait()).await.is_err() {
            self.inner.abort.cancel();
            warn!(worker_type = %self.worker_type(), "Worker did not drain before the deadline");
            return Err(JobError::ShutdownTimeout);
        }
        info!(worker_type = %self.worker_type(), "Worker shut down");
        Ok(())
    }
}

impl WorkerInner {
    async fn process(&self, mut job: Job) {
        let span = info_span!(
            "job",
            worker_type = %job.worker_type,
            job_id = %job.id,
            prefix = %job.prefix,
            trigger_id = job.trigger_id.as_deref().unwrap_or(""),
        );
        async move {
            if let Err(err) = self.jobs.ack_consumed(&mut job).await {
                error!(error = %err, "Cannot mark job as running, skipping it");
                return;
            }

            let mut ctx = WorkerContext::new(job, self.abort.child_token());
            let result = self.run(&mut ctx).await;

            let mut job = ctx.job().clone();
            let acked = match &result {
                Ok(()) => {
                    info!("Job done");
                    self.jobs.ack(&mut job).await
                }
                Err(err) if err.is_abort() => {
                    info!("Job aborted");
                    self.jobs.ack(&mut job).await
                }
                Err(err) => {
                    error!(error = %err, "Job errored");
                    self.jobs.nack(&mut job, &err.to_string()).await
                }
            };
            if let Err(err) = acked {
                error!(error = %err, "Cannot save the job outcome");
            }

            if let Err(err) = self.config.handler.commit(&ctx, result.as_ref().err()).await {
                warn!(error = %err, "Commit hook failed");
            }

            if let Err(err) = &result {
                if err.is_bad_trigger() {
                    self.delete_bad_trigger(&job).await;
                }
            }
        }
        .instrument(span)
        .await
    }

    /// The retry loop. Returns the outcome of the last attempt.
    async fn run(&self, ctx: &mut WorkerContext) -> JobResult<()> {
        let handler = Arc::clone(&self.config.handler);
        handler.start(ctx).await?;

        let options = ctx.job().options.clone().unwrap_or_default();
        let max_exec_count = options
            .max_exec_count
            .unwrap_or(self.config.max_exec_count)
            .max(1);
        let timeout = options
            .timeout
            .map_or(self.config.timeout, |t| t.min(self.config.timeout));
        let started = Instant::now();

        let mut attempt = 1;
        loop {
            ctx.begin_attempt(attempt, self.abort.child_token());
            let err = match self.exec(ctx, timeout).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            warn!(attempt, max_exec_count, error = %err, "Job attempt failed");

            let exhausted = attempt >= max_exec_count
                || options
                    .max_exec_time
                    .is_some_and(|max| started.elapsed() >= max);
            if exhausted
                || !err.is_retryable()
                || ctx.no_retry()
                || !handler.should_retry(&err)
                || self.abort.is_cancelled()
            {
                return Err(err);
            }

            let delay = retry_delay(self.config.retry_delay, attempt);
            debug!(attempt, ?delay, "Waiting before retrying job");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.abort.cancelled() => return Err(err),
            }
            attempt += 1;
        }
    }

    /// One attempt, bounded by `timeout`, with panics turned into errors.
    ///
    /// On timeout the attempt's token is cancelled and the attempt is still
    /// awaited: the worker function is expected to observe the cancellation.
    async fn exec(&self, ctx: &WorkerContext, timeout: Duration) -> JobResult<()> {
        let _permit = match &self.slots {
            Some(slots) => Some(
                Arc::clone(slots)
                    .acquire_owned()
                    .await
                    .map_err(|_| JobError::Closed)?,
            ),
            None => None,
        };

        let handler = Arc::clone(&self.config.handler);
        let token = ctx.cancellation_token();
        let fut = AssertUnwindSafe(handler.execute(ctx)).catch_unwind();
        tokio::pin!(fut);

        let first = tokio::time::timeout(timeout, &mut fut).await;
        let (outcome, timed_out) = match first {
            Ok(outcome) => (outcome, false),
            Err(_) => {
                token.cancel();
                (fut.await, true)
            }
        };

        match outcome {
            Ok(Err(_)) if timed_out => Err(JobError::Timeout(timeout)),
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, attempt = ctx.attempt(), "Job panicked");
                Err(JobError::Panicked(message))
            }
        }
    }

    async fn delete_bad_trigger(&self, job: &Job) {
        let Some(trigger_id) = job.trigger_id.as_deref() else {
            return;
        };
        let Some(scheduler) = self.scheduler.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        match scheduler.delete_trigger(&job.prefix, trigger_id).await {
            Ok(()) => warn!(trigger_id, "Deleted bad trigger"),
            Err(err) => error!(trigger_id, error = %err, "Cannot delete bad trigger"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_with_jitter() {
        let base = Duration::from_millis(100);
        for failures in 1..=4u32 {
            let expected = 100.0 * f64::from(1u32 << (failures - 1));
            let got = retry_delay(base, failures).as_secs_f64() * 1000.0;
            assert!(got >= expected * 0.9 - 1e-6 && got <= expected * 1.1 + 1e-6, "{failures}: {got}");
        }
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
