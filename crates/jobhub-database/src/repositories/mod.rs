//! Repositories over any [`DocumentStore`](jobhub_core::traits::DocumentStore).

pub mod job;
pub mod trigger;

pub use job::JobRepository;
pub use trigger::TriggerRepository;
