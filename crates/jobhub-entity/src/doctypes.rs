//! Doctype names used by the job system.

/// Jobs.
pub const JOBS: &str = "io.jobhub.jobs";
/// Triggers.
pub const TRIGGERS: &str = "io.jobhub.triggers";
/// Files and directories of the virtual file system.
pub const FILES: &str = "io.jobhub.files";

/// Value of the `type` field of a directory in [`FILES`].
pub const DIR_TYPE: &str = "directory";
