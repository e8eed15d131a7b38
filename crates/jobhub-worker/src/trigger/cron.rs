//! `@cron` triggers.
//!
//! Arguments are either a six-field crontab (seconds first) or a frequency
//! shorthand followed by an optional periodic window:
//! `@daily on weekday between 8am and 6pm`. A shorthand is resolved once
//! into a concrete crontab seeded by the trigger id.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{JobError, JobResult};
use crate::periodic::{Frequency, parse_periodic, seed_from_id};

/// A recurring trigger following a crontab.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expression: String,
    schedule: Schedule,
}

impl CronTrigger {
    /// Parse the arguments of the trigger `id`.
    pub fn parse(arguments: &str, id: &str) -> JobResult<Self> {
        let arguments = arguments.trim();
        let (head, rest) = arguments.split_once(' ').unwrap_or((arguments, ""));
        let expression = match Frequency::from_str(head) {
            Ok(frequency) => parse_periodic(rest)?.to_random_crontab(frequency, seed_from_id(id))?,
            Err(_) => arguments.to_string(),
        };
        let schedule = Schedule::from_str(&expression)
            .map_err(|err| JobError::MalformedTrigger(format!("@cron {arguments:?}: {err}")))?;
        Ok(Self {
            expression,
            schedule,
        })
    }

    /// The resolved crontab.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First firing strictly after `now`.
    pub fn next_execution(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Timelike};

    use super::*;

    #[test]
    fn test_crontab() {
        let t = CronTrigger::parse("*/3 * * * * *", "t1").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 1).unwrap();
        let next = t.next_execution(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 3).unwrap());
        assert!(CronTrigger::parse("every minute", "t1").is_err());
    }

    #[test]
    fn test_shorthand_is_stable_per_id() {
        let a = CronTrigger::parse("@daily between 8am and 6pm", "trigger-a").unwrap();
        let again = CronTrigger::parse("@daily between 8am and 6pm", "trigger-a").unwrap();
        assert_eq!(a.expression(), again.expression());

        let now = Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).unwrap();
        let next = a.next_execution(now).unwrap();
        assert!((8..18).contains(&next.hour()));
        assert!(CronTrigger::parse("@monthly on monday", "trigger-a").is_err());
    }
}
