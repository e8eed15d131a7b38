//! Job repository implementation.

use std::sync::Arc;

use tracing::debug;

use jobhub_core::error::{AppError, ErrorKind};
use jobhub_core::result::AppResult;
use jobhub_core::traits::DocumentStore;
use jobhub_core::types::query::{FilterField, FindRequest, SortField};
use jobhub_core::Prefix;
use jobhub_entity::doctypes;
use jobhub_entity::job::{Job, JobState};

/// Index over `(worker, state)`.
pub const INDEX_WORKER_STATE: &str = "by-worker-and-state";
/// Index over `(trigger_id, queued_at)`.
pub const INDEX_TRIGGER_QUEUED_AT: &str = "by-trigger-id-and-queued-at";

/// Repository for job documents and their state transitions.
#[derive(Debug, Clone)]
pub struct JobRepository {
    store: Arc<dyn DocumentStore>,
}

impl JobRepository {
    /// Create a new job repository.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Declare the indexes the job queries rely on.
    pub async fn define_indexes(&self, prefix: &Prefix) -> AppResult<()> {
        self.store
            .define_index(prefix, doctypes::JOBS, INDEX_WORKER_STATE, &["worker", "state"])
            .await?;
        self.store
            .define_index(
                prefix,
                doctypes::JOBS,
                INDEX_TRIGGER_QUEUED_AT,
                &["trigger_id", "queued_at"],
            )
            .await
    }

    /// Persist a new job.
    pub async fn create(&self, job: &mut Job) -> AppResult<()> {
        let mut doc = job.to_doc()?;
        self.store
            .create(&job.prefix, &mut doc)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create job", e))?;
        job.id = doc.id;
        debug!(job_id = %job.id, worker_type = %job.worker_type, prefix = %job.prefix, "Job created");
        Ok(())
    }

    /// Find a job by ID.
    pub async fn get(&self, prefix: &Prefix, id: &str) -> AppResult<Job> {
        let doc = self.store.get(prefix, doctypes::JOBS, id).await?;
        Job::from_doc(doc)
    }

    /// Mark a job as consumed by a worker.
    pub async fn ack_consumed(&self, job: &mut Job) -> AppResult<()> {
        job.mark_running();
        self.save(job).await
    }

    /// Mark a job as successfully done.
    pub async fn ack(&self, job: &mut Job) -> AppResult<()> {
        job.mark_done();
        self.save(job).await
    }

    /// Mark a job as failed with the error of its last attempt.
    pub async fn nack(&self, job: &mut Job, error: &str) -> AppResult<()> {
        job.mark_errored(error);
        self.save(job).await
    }

    /// Remove a job that never reached its queue.
    pub async fn delete(&self, job: &Job) -> AppResult<()> {
        let doc = job.to_doc()?;
        self.store.delete(&job.prefix, &doc).await
    }

    /// Jobs of a worker type still waiting in the queue.
    pub async fn get_queued_jobs(&self, prefix: &Prefix, worker_type: &str) -> AppResult<Vec<Job>> {
        let req = FindRequest::new(doctypes::JOBS)
            .use_index(INDEX_WORKER_STATE)
            .filter(FilterField::eq("worker", worker_type))
            .filter(FilterField::eq("state", JobState::Queued.as_str()))
            .sort(SortField::asc("queued_at"));
        self.find(prefix, &req).await
    }

    /// Most recent jobs produced by a trigger, newest first.
    pub async fn get_jobs_by_trigger(
        &self,
        prefix: &Prefix,
        trigger_id: &str,
        limit: usize,
    ) -> AppResult<Vec<Job>> {
        let req = FindRequest::new(doctypes::JOBS)
            .use_index(INDEX_TRIGGER_QUEUED_AT)
            .filter(FilterField::eq("trigger_id", trigger_id))
            .sort(SortField::desc("queued_at"))
            .limit(limit);
        self.find(prefix, &req).await
    }

    async fn find(&self, prefix: &Prefix, req: &FindRequest) -> AppResult<Vec<Job>> {
        self.store
            .find_docs(prefix, req)
            .await?
            .into_iter()
            .map(Job::from_doc)
            .collect()
    }

    async fn save(&self, job: &Job) -> AppResult<()> {
        let doc = job.to_doc()?;
        self.store.update(&job.prefix, &doc).await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, format!("Failed to update job {}", job.id), e)
        })
    }
}
