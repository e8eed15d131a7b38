//! In-memory broker for single-process deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{info, warn};

use jobhub_core::Prefix;
use jobhub_database::JobRepository;
use jobhub_entity::job::{Job, JobRequest};

use super::{Admission, Broker, admit};
use crate::error::{JobError, JobResult};
use crate::queue::MemoryQueue;
use crate::registry::WorkerRegistry;
use crate::scheduler::Scheduler;
use crate::worker::Worker;

#[derive(Debug)]
struct Started {
    registry: Arc<WorkerRegistry>,
    queues: HashMap<String, MemoryQueue>,
}

/// Broker keeping one FIFO queue per worker type in memory.
#[derive(Debug)]
pub struct MemoryBroker {
    jobs: JobRepository,
    slots: Option<Arc<Semaphore>>,
    running: AtomicBool,
    started: OnceLock<Started>,
    workers: Mutex<Vec<Worker>>,
}

impl MemoryBroker {
    /// Create a broker persisting jobs through `jobs`.
    pub fn new(jobs: JobRepository, slots: Option<Arc<Semaphore>>) -> Self {
        Self {
            jobs,
            slots,
            running: AtomicBool::new(false),
            started: OnceLock::new(),
            workers: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn start_workers(
        &self,
        registry: Arc<WorkerRegistry>,
        scheduler: Option<Weak<dyn Scheduler>>,
    ) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut queues = HashMap::new();
        let mut workers = self.workers.lock().await;
        for config in registry.configs() {
            let queue = MemoryQueue::new();
            if config.concurrency > 0 {
                let worker = Worker::new(
                    Arc::clone(config),
                    self.jobs.clone(),
                    self.slots.clone(),
                    scheduler.clone(),
                );
                worker.start(queue.source())?;
                workers.push(worker);
            }
            queues.insert(config.worker_type.clone(), queue);
        }

        if self.started.set(Started { registry, queues }).is_err() {
            return Err(JobError::Unsupported("restarting a memory broker"));
        }
        info!(workers = workers.len(), "Memory broker started");
        Ok(())
    }

    async fn shutdown_workers(&self, deadline: Duration) -> JobResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(started) = self.started.get() {
            for queue in started.queues.values() {
                queue.close();
            }
        }

        let until = Instant::now() + deadline;
        let mut timed_out = false;
        for worker in self.workers.lock().await.drain(..) {
            let left = until.saturating_duration_since(Instant::now());
            if let Err(err) = worker.shutdown(left).await {
                warn!(worker_type = %worker.worker_type(), error = %err, "Worker shutdown failed");
                timed_out = true;
            }
        }
        if timed_out {
            return Err(JobError::ShutdownTimeout);
        }
        info!("Memory broker shut down");
        Ok(())
    }

    async fn push_job(&self, prefix: &Prefix, req: JobRequest) -> JobResult<Job> {
        let started = self
            .started
            .get()
            .ok_or_else(|| JobError::UnknownWorker(req.worker_type.clone()))?;
        let closed = started
            .queues
            .get(&req.worker_type)
            .is_some_and(MemoryQueue::is_closed);
        if closed || !self.running.load(Ordering::SeqCst) {
            return Err(JobError::Closed);
        }
        match admit(&started.registry, &self.jobs, prefix, &req).await? {
            Admission::Skipped(job) => Ok(job),
            Admission::Queued(job) => {
                let queue = started
                    .queues
                    .get(&job.worker_type)
                    .ok_or_else(|| JobError::UnknownWorker(job.worker_type.clone()))?;
                if let Err(err) = queue.push(job.clone()) {
                    // Closed by a concurrent shutdown.
                    if let Err(del) = self.jobs.delete(&job).await {
                        warn!(job_id = %job.id, error = %del, "Cannot delete unqueued job");
                    }
                    return Err(err);
                }
                Ok(job)
            }
        }
    }

    async fn worker_queue_len(&self, worker_type: &str) -> JobResult<usize> {
        self.started
            .get()
            .and_then(|s| s.queues.get(worker_type))
            .map(MemoryQueue::len)
            .ok_or_else(|| JobError::UnknownWorker(worker_type.to_string()))
    }

    fn workers_types(&self) -> Vec<String> {
        self.started
            .get()
            .map(|s| s.registry.types())
            .unwrap_or_default()
    }
}
