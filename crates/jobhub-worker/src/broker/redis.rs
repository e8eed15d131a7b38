//! Redis broker for multi-process deployments.
//!
//! Each worker type has two Redis lists, `j/<type>` and the high-priority
//! `j/<type>/p0` used by manual jobs. Elements are `"<prefix>/<jobID>"`: the
//! consumer reads the job itself back from the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use jobhub_core::Prefix;
use jobhub_database::JobRepository;
use jobhub_entity::job::{Job, JobRequest};

use super::{Admission, Broker, admit};
use crate::error::{JobError, JobResult};
use crate::redis::RedisClient;
use crate::registry::WorkerRegistry;
use crate::scheduler::Scheduler;
use crate::worker::{JobSource, Worker};

/// Seconds a `BRPOP` waits before polling again. A consumer notices a
/// shutdown between two pops, so this bounds how long stopping takes.
const BRPOP_TIMEOUT_SECS: u64 = 1;

fn queue_key(worker_type: &str) -> String {
    format!("j/{worker_type}")
}

fn priority_key(worker_type: &str) -> String {
    format!("j/{worker_type}/p0")
}

/// Broker backed by Redis lists.
#[derive(Debug)]
pub struct RedisBroker {
    client: RedisClient,
    jobs: JobRepository,
    slots: Option<Arc<Semaphore>>,
    running: AtomicBool,
    registry: OnceLock<Arc<WorkerRegistry>>,
    workers: Mutex<Vec<Worker>>,
}

impl RedisBroker {
    /// Create a broker using `client` for its queues.
    pub fn new(client: RedisClient, jobs: JobRepository, slots: Option<Arc<Semaphore>>) -> Self {
        Self {
            client,
            jobs,
            slots,
            running: AtomicBool::new(false),
            registry: OnceLock::new(),
            workers: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn start_workers(
        &self,
        registry: Arc<WorkerRegistry>,
        scheduler: Option<Weak<dyn Scheduler>>,
    ) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut workers = self.workers.lock().await;
        for config in registry.configs().filter(|c| c.concurrency > 0) {
            let source = Arc::new(RedisSource {
                client: self.client.clone(),
                jobs: self.jobs.clone(),
                keys: [priority_key(&config.worker_type), queue_key(&config.worker_type)],
                conn: Mutex::new(None),
            });
            let worker = Worker::new(
                Arc::clone(config),
                self.jobs.clone(),
                self.slots.clone(),
                scheduler.clone(),
            );
            worker.start(source)?;
            workers.push(worker);
        }

        if self.registry.set(registry).is_err() {
            return Err(JobError::Unsupported("restarting a Redis broker"));
        }
        info!(workers = workers.len(), "Redis broker started");
        Ok(())
    }

    async fn shutdown_workers(&self, deadline: Duration) -> JobResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
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
        info!("Redis broker shut down");
        Ok(())
    }

    async fn push_job(&self, prefix: &Prefix, req: JobRequest) -> JobResult<Job> {
        let registry = self
            .registry
            .get()
            .ok_or_else(|| JobError::UnknownWorker(req.worker_type.clone()))?;
        if !self.running.load(Ordering::SeqCst) {
            return Err(JobError::Closed);
        }
        let job = match admit(registry, &self.jobs, prefix, &req).await? {
            Admission::Skipped(job) => return Ok(job),
            Admission::Queued(job) => job,
        };

        let key = if job.manual {
            priority_key(&job.worker_type)
        } else {
            queue_key(&job.worker_type)
        };
        let mut conn = self.client.conn_mut();
        let _: () = conn.lpush(&key, prefix.scoped(&job.id)).await?;
        debug!(job_id = %job.id, queue = %key, "Job pushed");
        Ok(job)
    }

    async fn worker_queue_len(&self, worker_type: &str) -> JobResult<usize> {
        let mut conn = self.client.conn_mut();
        let (normal, priority): (usize, usize) = redis::pipe()
            .llen(queue_key(worker_type))
            .llen(priority_key(worker_type))
            .query_async(&mut conn)
            .await?;
        Ok(normal + priority)
    }

    fn workers_types(&self) -> Vec<String> {
        self.registry
            .get()
            .map(|r| r.types())
            .unwrap_or_default()
    }
}

/// Consumer side of the two lists of one worker type.
struct RedisSource {
    client: RedisClient,
    jobs: JobRepository,
    /// High-priority list first, then the normal one.
    keys: [String; 2],
    /// Dedicated connection for `BRPOP`, opened lazily.
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisSource {
    /// Pop one element, checking the high-priority list first two times
    /// out of three. `BRPOP` serves the first non-empty list it is given.
    async fn pop(&self) -> JobResult<Option<String>> {
        let [priority, normal] = &self.keys;
        let keys = if rand::random_ratio(2, 3) {
            [priority, normal]
        } else {
            [normal, priority]
        };

        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.client.blocking_connection().await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Ok(None);
        };
        let popped: Result<Option<(String, String)>, _> = redis::cmd("BRPOP")
            .arg(keys[0])
            .arg(keys[1])
            .arg(BRPOP_TIMEOUT_SECS)
            .query_async(conn)
            .await;
        match popped {
            Ok(popped) => Ok(popped.map(|(_, element)| element)),
            Err(err) => {
                *guard = None;
                Err(err.into())
            }
        }
    }

    async fn load(&self, element: &str) -> JobResult<Option<Job>> {
        let Some((prefix, job_id)) = element.split_once('/') else {
            warn!(element, "Malformed queue element");
            return Ok(None);
        };
        match self.jobs.get(&Prefix::from_db_prefix(prefix), job_id).await {
            Ok(job) => Ok(Some(job)),
            Err(err) if err.is_not_found() => {
                warn!(prefix, job_id, "Queued job no longer exists");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl JobSource for RedisSource {
    /// `stop` is only checked between pops: a `BRPOP` in flight is never
    /// abandoned, since the element it pops is gone from Redis.
    async fn next_job(&self, stop: &CancellationToken) -> Option<Job> {
        while !stop.is_cancelled() {
            let result = match self.pop().await {
                Ok(Some(element)) => self.load(&element).await,
                Ok(None) => Ok(None),
                Err(err) => Err(err),
            };
            match result {
                Ok(Some(job)) => return Some(job),
                Ok(None) => continue,
                Err(err) => {
                    warn!(queue = %self.keys[1], error = %err, "Cannot dequeue job");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = stop.cancelled() => return None,
                    }
                }
            }
        }
        None
    }
}
