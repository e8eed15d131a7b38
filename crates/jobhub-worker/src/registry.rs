//! Worker type registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use jobhub_core::config::jobs::WorkerOverride;

use crate::error::{JobError, JobResult};
use crate::executor::JobHandler;

/// Static configuration of one worker type.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker type name.
    pub worker_type: String,
    /// Number of concurrent consumers. 0 disables the pool on this process.
    pub concurrency: usize,
    /// Maximum number of executions of one job.
    pub max_exec_count: u32,
    /// Timeout of one execution.
    pub timeout: Duration,
    /// Base delay between executions, doubled after each failure.
    pub retry_delay: Duration,
    /// Jobs can only be pushed by administrators.
    pub admin_only: bool,
    /// Worker function and hooks.
    pub handler: Arc<dyn JobHandler>,
}

impl WorkerConfig {
    /// Configuration with the default policy: concurrency 1, 3 executions,
    /// 10s timeout, 60ms base retry delay.
    pub fn new(worker_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            worker_type: worker_type.into(),
            concurrency: 1,
            max_exec_count: 3,
            timeout: Duration::from_secs(10),
            retry_delay: Duration::from_millis(60),
            admin_only: false,
            handler,
        }
    }

    /// Set the concurrency.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the maximum number of executions.
    pub fn max_exec_count(mut self, count: u32) -> Self {
        self.max_exec_count = count;
        self
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the base retry delay.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Restrict pushes to administrators.
    pub fn admin_only(mut self, admin_only: bool) -> Self {
        self.admin_only = admin_only;
        self
    }

    /// Apply overrides read from configuration.
    pub fn apply(&mut self, overrides: &WorkerOverride) {
        if let Some(concurrency) = overrides.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(count) = overrides.max_exec_count {
            self.max_exec_count = count;
        }
        if let Some(secs) = overrides.timeout_seconds {
            self.timeout = Duration::from_secs(secs);
        }
    }
}

/// Worker configurations keyed by worker type.
///
/// Registration is only possible until the registry is frozen, which the
/// job system does when it starts.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, Arc<WorkerConfig>>,
    frozen: bool,
}

impl WorkerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker type.
    pub fn add(&mut self, config: WorkerConfig) -> JobResult<()> {
        if self.frozen {
            return Err(JobError::RegistryFrozen);
        }
        if self.workers.contains_key(&config.worker_type) {
            return Err(JobError::DuplicateWorker(config.worker_type));
        }
        self.workers.insert(config.worker_type.clone(), Arc::new(config));
        Ok(())
    }

    /// Apply configuration overrides to the registered types.
    pub fn apply_overrides<'a>(
        &mut self,
        overrides: impl IntoIterator<Item = (&'a String, &'a WorkerOverride)>,
    ) {
        for (worker_type, o) in overrides {
            if let Some(config) = self.workers.get_mut(worker_type) {
                Arc::make_mut(config).apply(o);
            }
        }
    }

    /// Forbid further registrations.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Whether registrations are still accepted.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Configuration of a worker type.
    pub fn get(&self, worker_type: &str) -> Option<Arc<WorkerConfig>> {
        self.workers.get(worker_type).cloned()
    }

    /// Every registered configuration.
    pub fn configs(&self) -> impl Iterator<Item = &Arc<WorkerConfig>> {
        self.workers.values()
    }

    /// Registered worker types, sorted.
    pub fn types(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }
}
