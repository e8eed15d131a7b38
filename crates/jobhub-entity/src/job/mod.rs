//! Job domain entities.

pub mod message;
pub mod model;
pub mod options;
pub mod request;
pub mod status;

pub use message::Message;
pub use model::Job;
pub use options::JobOptions;
pub use request::JobRequest;
pub use status::JobState;
