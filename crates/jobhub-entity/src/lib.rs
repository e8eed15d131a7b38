//! # jobhub-entity
//!
//! Document models of the job system. Jobs and triggers are stored as JSON
//! documents in the per-tenant document store; every struct here converts
//! to and from a [`Doc`](jobhub_core::events::Doc).

pub mod doctypes;
pub mod job;
pub mod trigger;
