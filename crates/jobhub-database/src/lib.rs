//! # jobhub-database
//!
//! The in-process document store and the repositories through which the
//! job system reads and writes its job and trigger documents.

pub mod memory;
pub mod repositories;

pub use memory::MemoryStore;
pub use repositories::{JobRepository, TriggerRepository};
