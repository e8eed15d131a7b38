//! # jobhub-worker
//!
//! The job-execution core of JobHub:
//!
//! - brokers queueing jobs per worker type, in memory or in Redis;
//! - worker pools with retries, exponential backoff, timeouts and panic
//!   recovery;
//! - schedulers firing triggers (`@at`, `@in`, `@cron`, `@every`,
//!   `@event`, `@webhook`, `@client`), in memory or shared through Redis;
//! - [`JobSystem`], which wires them together.

pub mod broker;
pub mod context;
pub mod duration;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod periodic;
pub mod queue;
pub mod redis;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod system;
pub mod trigger;
pub mod worker;

pub use context::WorkerContext;
pub use error::{JobError, JobResult};
pub use executor::JobHandler;
pub use registry::{WorkerConfig, WorkerRegistry};
pub use system::{Fired, JobSystem};
pub use trigger::Trigger;
