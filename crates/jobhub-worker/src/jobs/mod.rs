//! Built-in worker types.

pub mod log;

pub use self::log::LogWorker;
