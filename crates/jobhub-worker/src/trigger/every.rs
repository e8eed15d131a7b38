//! `@every` triggers: a fixed interval, e.g. `@every 30m` stored as `30m`.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::duration::parse_duration;
use crate::error::{JobError, JobResult};

/// A trigger firing at a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EveryTrigger {
    interval: Duration,
}

impl EveryTrigger {
    /// Parse a non-zero duration.
    pub fn parse(arguments: &str) -> JobResult<Self> {
        let interval = parse_duration(arguments)?;
        if interval.is_zero() {
            return Err(JobError::MalformedTrigger("@every needs a non-zero interval".into()));
        }
        Ok(Self { interval })
    }

    /// The interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `now` plus the interval.
    pub fn next_execution(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.interval)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every() {
        let t = EveryTrigger::parse("1h30m").unwrap();
        let now = Utc::now();
        assert_eq!(t.next_execution(now).unwrap() - now, chrono::Duration::minutes(90));
        assert!(EveryTrigger::parse("0s").is_err());
    }
}
