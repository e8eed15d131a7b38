//! # jobhub-core
//!
//! Core crate for JobHub. Contains the unified error system, configuration
//! schemas, the tenant [`Prefix`](types::prefixer::Prefix) type, realtime
//! event types, and the contracts of the two collaborators the job system
//! consumes: the document store and the realtime hub.
//!
//! This crate has **no** internal dependencies on other JobHub crates.

pub mod config;
pub mod error;
pub mod events;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
pub use types::prefixer::Prefix;
