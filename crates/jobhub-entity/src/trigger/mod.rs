//! Trigger domain entities.

pub mod infos;
pub mod state;

pub use infos::TriggerInfos;
pub use state::{TriggerState, TriggerStatus};
