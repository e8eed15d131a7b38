//! Job brokers: route job requests into per worker-type queues and drive
//! the worker pools consuming them.

pub mod memory;
pub mod redis;

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;

use jobhub_core::Prefix;
use jobhub_database::JobRepository;
use jobhub_entity::job::{Job, JobRequest};

use crate::error::{JobError, JobResult};
use crate::registry::WorkerRegistry;
use crate::scheduler::Scheduler;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;

/// Queues jobs and dispatches them to worker pools.
#[async_trait]
pub trait Broker: Send + Sync + std::fmt::Debug + 'static {
    /// Create one queue per registered worker type and start a pool for
    /// every type with a non-zero concurrency. Starting twice is a no-op.
    async fn start_workers(
        &self,
        registry: Arc<WorkerRegistry>,
        scheduler: Option<Weak<dyn Scheduler>>,
    ) -> JobResult<()>;

    /// Close the queues and wait for the pools, at most `deadline`.
    async fn shutdown_workers(&self, deadline: Duration) -> JobResult<()>;

    /// Persist a job in the `queued` state and enqueue it.
    ///
    /// When the worker's `before_enqueue` hook vetoes the job, it is
    /// returned without being persisted nor queued.
    async fn push_job(&self, prefix: &Prefix, req: JobRequest) -> JobResult<Job>;

    /// Number of jobs waiting in the queue of a worker type.
    async fn worker_queue_len(&self, worker_type: &str) -> JobResult<usize>;

    /// Worker types known to the broker.
    fn workers_types(&self) -> Vec<String>;
}

/// Outcome of checking a request against the registry.
pub(crate) enum Admission {
    /// The job was persisted and must be queued.
    Queued(Job),
    /// The job was vetoed by its worker and must be returned as is.
    Skipped(Job),
}

/// Resolve the worker of a request, apply its admission rules and persist
/// the job. An admin-only worker is reported exactly like an unknown one.
pub(crate) async fn admit(
    registry: &WorkerRegistry,
    jobs: &JobRepository,
    prefix: &Prefix,
    req: &JobRequest,
) -> JobResult<Admission> {
    let config = registry
        .get(&req.worker_type)
        .filter(|c| !c.admin_only || req.admin)
        .ok_or_else(|| JobError::UnknownWorker(req.worker_type.clone()))?;

    let mut job = Job::from_request(prefix, req);
    if !config.handler.before_enqueue(&job) {
        tracing::debug!(worker_type = %job.worker_type, prefix = %prefix, "Job skipped by its worker");
        return Ok(Admission::Skipped(job));
    }
    jobs.create(&mut job).await?;
    Ok(Admission::Queued(job))
}
