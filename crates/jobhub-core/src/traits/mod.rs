//! Contracts of the collaborators the job system consumes.

pub mod realtime;
pub mod store;

pub use realtime::{RealtimeHub, Subscriber};
pub use store::DocumentStore;
