//! Schedulers: hold the triggers of every tenant and push the jobs they
//! produce to a [`Broker`].

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jobhub_core::Prefix;

use crate::broker::Broker;
use crate::error::{JobError, JobResult};
use crate::trigger::Trigger;

pub use self::memory::MemoryScheduler;
pub use self::redis::RedisScheduler;

/// Trigger storage and firing.
#[async_trait]
pub trait Scheduler: Send + Sync + std::fmt::Debug + 'static {
    /// Load the persisted triggers of every tenant and start firing them
    /// into `broker`.
    async fn start_scheduler(&self, broker: Arc<dyn Broker>) -> JobResult<()>;

    /// Stop firing, flushing pending debounced jobs, at most `deadline`.
    async fn shutdown_scheduler(&self, deadline: Duration) -> JobResult<()>;

    /// Fire whatever is due at `now`. Only meaningful for schedulers driven
    /// by polling.
    async fn poll_scheduler(&self, _now: DateTime<Utc>) -> JobResult<()> {
        Ok(())
    }

    /// Persist and schedule a trigger.
    async fn add_trigger(&self, trigger: Trigger) -> JobResult<()>;

    /// Load a trigger.
    async fn get_trigger(&self, prefix: &Prefix, trigger_id: &str) -> JobResult<Trigger>;

    /// Unschedule and delete a trigger.
    async fn delete_trigger(&self, prefix: &Prefix, trigger_id: &str) -> JobResult<()>;

    /// Every trigger of a tenant.
    async fn get_all_triggers(&self, prefix: &Prefix) -> JobResult<Vec<Trigger>>;

    /// Drop every scheduling entry from Redis.
    async fn clean_redis(&self) -> JobResult<()> {
        Err(JobError::Unsupported("clean_redis on a non-Redis scheduler"))
    }

    /// Rebuild the Redis scheduling entries from the stored triggers.
    async fn rebuild_redis(&self) -> JobResult<()> {
        Err(JobError::Unsupported("rebuild_redis on a non-Redis scheduler"))
    }
}

/// Turn a stored trigger into a [`Trigger`], mapping a missing document to
/// [`JobError::NotFoundTrigger`].
pub(crate) fn load_trigger(
    result: jobhub_core::AppResult<jobhub_entity::trigger::TriggerInfos>,
    trigger_id: &str,
) -> JobResult<Trigger> {
    match result {
        Ok(infos) => Trigger::new(infos),
        Err(err) if err.is_not_found() => Err(JobError::NotFoundTrigger(trigger_id.to_string())),
        Err(err) => Err(err.into()),
    }
}
