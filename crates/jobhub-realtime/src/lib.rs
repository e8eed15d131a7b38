//! # jobhub-realtime
//!
//! In-process realtime hub. Document writes are published as
//! [`Event`](jobhub_core::events::Event)s; subscribers receive the events of
//! one tenant filtered by doctype, or every event through the firehose.

pub mod hub;

pub use hub::{MemoryHub, MemorySubscriber};
