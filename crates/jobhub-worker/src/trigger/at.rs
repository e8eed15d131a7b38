//! One-shot triggers: `@at` (absolute) and `@in` (relative to creation).

use chrono::{DateTime, Utc};

use crate::duration::parse_duration;
use crate::error::{JobError, JobResult};

/// How late a one-shot trigger may still fire.
pub const MAX_LATENESS: chrono::Duration = chrono::Duration::hours(24);

/// A trigger firing once at a fixed instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtTrigger {
    at: DateTime<Utc>,
}

impl AtTrigger {
    /// Parse an RFC 3339 instant, e.g. `2026-10-16T09:00:00+02:00`.
    pub fn parse_at(arguments: &str) -> JobResult<Self> {
        let at = DateTime::parse_from_rfc3339(arguments.trim()).map_err(|err| {
            JobError::MalformedTrigger(format!("@at {arguments:?}: {err}"))
        })?;
        Ok(Self {
            at: at.with_timezone(&Utc),
        })
    }

    /// Parse a duration counted from `base`, e.g. `10m`.
    pub fn parse_in(arguments: &str, base: DateTime<Utc>) -> JobResult<Self> {
        let delay = parse_duration(arguments)?;
        let delay = chrono::Duration::from_std(delay)
            .map_err(|err| JobError::MalformedTrigger(format!("@in {arguments:?}: {err}")))?;
        Ok(Self { at: base + delay })
    }

    /// The firing instant.
    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    /// Whether the instant is so far behind `now` that firing is pointless.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.at > MAX_LATENESS
    }
}
