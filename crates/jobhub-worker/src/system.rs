//! The job system: a worker registry, a broker and a scheduler wired
//! together, with the queries over jobs and triggers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{info, warn};

use jobhub_core::Prefix;
use jobhub_core::config::jobs::{BrokerKind, JobsConfig};
use jobhub_core::traits::{DocumentStore, RealtimeHub};
use jobhub_database::JobRepository;
use jobhub_entity::job::{Job, JobRequest, Message};
use jobhub_entity::trigger::TriggerState;

use crate::broker::{Broker, MemoryBroker, RedisBroker};
use crate::error::{JobError, JobResult};
use crate::redis::RedisClient;
use crate::registry::{WorkerConfig, WorkerRegistry};
use crate::scheduler::{MemoryScheduler, RedisScheduler, Scheduler};
use crate::state;
use crate::trigger::Trigger;

/// Outcome of a manual firing.
#[derive(Debug)]
pub struct Fired {
    /// The pushed job.
    pub job: Job,
    /// Value returned by the webhook callback, if any.
    pub response: Option<serde_json::Value>,
}

/// Entry point of the job system.
///
/// Worker types are registered with [`JobSystem::add_worker`] before
/// [`JobSystem::start`]; afterwards the registry is frozen.
#[derive(Debug)]
pub struct JobSystem {
    config: JobsConfig,
    registry: Mutex<WorkerRegistry>,
    broker: Arc<dyn Broker>,
    scheduler: Arc<dyn Scheduler>,
    jobs: JobRepository,
    started: AtomicBool,
}

impl JobSystem {
    /// Build the broker and scheduler selected by `config.broker`.
    pub async fn new(
        config: JobsConfig,
        store: Arc<dyn DocumentStore>,
        hub: Arc<dyn RealtimeHub>,
    ) -> JobResult<Self> {
        let jobs = JobRepository::new(Arc::clone(&store));
        let slots = (config.slots > 0).then(|| Arc::new(Semaphore::new(config.slots)));

        let (broker, scheduler): (Arc<dyn Broker>, Arc<dyn Scheduler>) = match config.broker {
            BrokerKind::Memory => (
                Arc::new(MemoryBroker::new(jobs.clone(), slots)),
                Arc::new(MemoryScheduler::new(Arc::clone(&store), hub)),
            ),
            BrokerKind::Redis => {
                let client = RedisClient::connect(&config.redis_url).await?;
                (
                    Arc::new(RedisBroker::new(client.clone(), jobs.clone(), slots)),
                    Arc::new(RedisScheduler::new(
                        client,
                        Arc::clone(&store),
                        hub,
                        config.event_dispatchers,
                    )),
                )
            }
        };
        info!(broker = ?config.broker, slots = config.slots, "Job system created");
        Ok(Self::with_backends(config, store, broker, scheduler))
    }

    /// Assemble a job system from explicit backends.
    pub fn with_backends(
        config: JobsConfig,
        store: Arc<dyn DocumentStore>,
        broker: Arc<dyn Broker>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            config,
            registry: Mutex::new(WorkerRegistry::new()),
            broker,
            scheduler,
            jobs: JobRepository::new(store),
            started: AtomicBool::new(false),
        }
    }

    /// Register a worker type.
    pub async fn add_worker(&self, config: WorkerConfig) -> JobResult<()> {
        self.registry.lock().await.add(config)
    }

    /// Apply configuration overrides, initialise the workers, then start
    /// the broker and the scheduler.
    pub async fn start(&self) -> JobResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let registry = {
            let mut registry = self.registry.lock().await;
            registry.apply_overrides(&self.config.workers);
            registry.freeze();
            Arc::new(registry.clone())
        };
        for config in registry.configs() {
            config.handler.init().await?;
        }

        let scheduler = Arc::downgrade(&self.scheduler);
        self.broker
            .start_workers(registry, Some(scheduler))
            .await?;
        self.scheduler
            .start_scheduler(Arc::clone(&self.broker))
            .await?;
        info!(workers = ?self.broker.workers_types(), "Job system started");
        Ok(())
    }

    /// Stop the scheduler, then the workers, sharing `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> JobResult<()> {
        let until = Instant::now() + deadline;
        let scheduler = self.scheduler.shutdown_scheduler(deadline).await;
        if let Err(err) = &scheduler {
            warn!(error = %err, "Scheduler shutdown failed");
        }
        let left = until.saturating_duration_since(Instant::now());
        self.broker.shutdown_workers(left).await?;
        scheduler
    }

    /// Deadline from the configuration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.config.shutdown_timeout_seconds)
    }

    /// The broker of the system.
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// The scheduler of the system.
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Push a job.
    pub async fn push_job(&self, prefix: &Prefix, req: JobRequest) -> JobResult<Job> {
        self.broker.push_job(prefix, req).await
    }

    /// Number of jobs waiting for a worker type.
    pub async fn worker_queue_len(&self, worker_type: &str) -> JobResult<usize> {
        self.broker.worker_queue_len(worker_type).await
    }

    /// Persist and schedule a trigger. Its worker type must be registered.
    pub async fn add_trigger(&self, trigger: Trigger) -> JobResult<Trigger> {
        let worker_type = &trigger.infos().worker_type;
        if self.registry.lock().await.get(worker_type).is_none() {
            return Err(JobError::UnknownWorker(worker_type.clone()));
        }
        self.scheduler.add_trigger(trigger.clone()).await?;
        Ok(trigger)
    }

    /// Load a trigger.
    pub async fn get_trigger(&self, prefix: &Prefix, trigger_id: &str) -> JobResult<Trigger> {
        self.scheduler.get_trigger(prefix, trigger_id).await
    }

    /// Delete a trigger and cancel its pending firings.
    pub async fn delete_trigger(&self, prefix: &Prefix, trigger_id: &str) -> JobResult<()> {
        self.scheduler.delete_trigger(prefix, trigger_id).await
    }

    /// Every trigger of a tenant.
    pub async fn get_all_triggers(&self, prefix: &Prefix) -> JobResult<Vec<Trigger>> {
        self.scheduler.get_all_triggers(prefix).await
    }

    /// Fire a trigger by hand. The job goes to the high-priority lane; a
    /// webhook payload is attached to it and the webhook callback, if any,
    /// is called with the pushed job.
    pub async fn fire(&self, trigger: &Trigger, payload: Option<Message>) -> JobResult<Fired> {
        let job = self
            .broker
            .push_job(trigger.prefix(), trigger.manual_request(payload))
            .await?;
        let response = match trigger.callback() {
            Some(callback) => Some((**callback)(&job)?),
            None => None,
        };
        info!(trigger_id = %trigger.id(), job_id = %job.id, "Trigger fired manually");
        Ok(Fired { job, response })
    }

    /// Load a trigger and [`fire`](Self::fire) it.
    pub async fn fire_trigger(
        &self,
        prefix: &Prefix,
        trigger_id: &str,
        payload: Option<Message>,
    ) -> JobResult<Fired> {
        let trigger = self.scheduler.get_trigger(prefix, trigger_id).await?;
        self.fire(&trigger, payload).await
    }

    /// Load a job.
    pub async fn get_job(&self, prefix: &Prefix, job_id: &str) -> JobResult<Job> {
        match self.jobs.get(prefix, job_id).await {
            Ok(job) => Ok(job),
            Err(err) if err.is_not_found() => Err(JobError::NotFoundJob(job_id.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Jobs of a worker type still waiting in a tenant.
    pub async fn get_queued_jobs(&self, prefix: &Prefix, worker_type: &str) -> JobResult<Vec<Job>> {
        self.jobs.define_indexes(prefix).await?;
        Ok(self.jobs.get_queued_jobs(prefix, worker_type).await?)
    }

    /// Most recent jobs of a trigger, newest first.
    pub async fn get_jobs_by_trigger(
        &self,
        prefix: &Prefix,
        trigger_id: &str,
        limit: usize,
    ) -> JobResult<Vec<Job>> {
        self.jobs.define_indexes(prefix).await?;
        Ok(self
            .jobs
            .get_jobs_by_trigger(prefix, trigger_id, limit)
            .await?)
    }

    /// Execution summary of a trigger.
    pub async fn trigger_state(&self, prefix: &Prefix, trigger_id: &str) -> JobResult<TriggerState> {
        self.jobs.define_indexes(prefix).await?;
        state::trigger_state(&self.jobs, prefix, trigger_id).await
    }
}
