//! Core type definitions used across the JobHub workspace.

pub mod prefixer;
pub mod query;

pub use prefixer::Prefix;
pub use query::{FilterField, FilterOp, FindRequest, SortDirection, SortField};
