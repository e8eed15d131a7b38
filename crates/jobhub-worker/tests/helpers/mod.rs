//! Shared helpers for the job system integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use jobhub_core::config::jobs::JobsConfig;
use jobhub_core::traits::{DocumentStore, RealtimeHub};
use jobhub_core::Prefix;
use jobhub_database::MemoryStore;
use jobhub_entity::job::{Job, JobState};
use jobhub_realtime::MemoryHub;
use jobhub_worker::{JobError, JobHandler, JobResult, JobSystem, WorkerConfig, WorkerContext};

/// What a [`Recorder`] does with each attempt.
#[derive(Debug, Clone, Copy)]
pub enum Mode {
    Succeed,
    Fail,
    /// Fail the first `n` attempts, then succeed.
    FailTimes(u32),
    Abort,
    BadTrigger,
    Panic,
    /// Sleep, stopping early when cancelled.
    Sleep(Duration),
    /// Sleep, ignoring cancellation.
    Stubborn(Duration),
}

/// Worker counting its attempts and remembering the jobs it saw.
#[derive(Debug)]
pub struct Recorder {
    pub mode: Mode,
    pub calls: AtomicU32,
    pub seen: Mutex<Vec<Job>>,
}

impl Recorder {
    pub fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Job> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobHandler for Recorder {
    async fn execute(&self, ctx: &WorkerContext) -> JobResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().unwrap().push(ctx.job().clone());
        match self.mode {
            Mode::Succeed => Ok(()),
            Mode::Fail => Err(JobError::execution("boom")),
            Mode::FailTimes(n) if call <= n => Err(JobError::execution("boom")),
            Mode::FailTimes(_) => Ok(()),
            Mode::Abort => Err(JobError::Abort),
            Mode::BadTrigger => Err(JobError::BadTrigger("no such folder".into())),
            Mode::Panic => panic!("worker exploded"),
            Mode::Sleep(d) => {
                tokio::select! {
                    _ = tokio::time::sleep(d) => Ok(()),
                    _ = ctx.cancelled() => Err(JobError::execution("cancelled")),
                }
            }
            Mode::Stubborn(d) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
        }
    }
}

/// An in-memory job system for one tenant.
pub struct TestSystem {
    pub system: JobSystem,
    pub store: Arc<dyn DocumentStore>,
    pub hub: Arc<dyn RealtimeHub>,
    pub prefix: Prefix,
}

impl TestSystem {
    /// A started system running `workers`.
    pub async fn start(workers: Vec<WorkerConfig>) -> Self {
        Self::start_with(JobsConfig::default(), workers).await
    }

    /// A started system with a custom configuration.
    pub async fn start_with(config: JobsConfig, workers: Vec<WorkerConfig>) -> Self {
        let hub: Arc<dyn RealtimeHub> = Arc::new(MemoryHub::new(1024));
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::with_hub(Arc::clone(&hub)));
        let system = JobSystem::new(config, Arc::clone(&store), Arc::clone(&hub))
            .await
            .unwrap();
        for worker in workers {
            system.add_worker(worker).await.unwrap();
        }
        system.start().await.unwrap();
        Self {
            system,
            store,
            hub,
            prefix: Prefix::new("alice.example.net", "alice"),
        }
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait_job(&self, job_id: &str) -> Job {
        let (system, prefix) = (&self.system, &self.prefix);
        wait_until(Duration::from_secs(5), || async move {
            system
                .get_job(prefix, job_id)
                .await
                .ok()
                .filter(|job| job.state == JobState::Done || job.state == JobState::Errored)
        })
        .await
        .expect("job did not finish in time")
    }

    /// Jobs produced by a trigger, newest first.
    pub async fn trigger_jobs(&self, trigger_id: &str) -> Vec<Job> {
        self.system
            .get_jobs_by_trigger(&self.prefix, trigger_id, 100)
            .await
            .unwrap()
    }
}

/// Poll `check` every 20ms until it yields a value or `timeout` elapses.
pub async fn wait_until<T, F, Fut>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
