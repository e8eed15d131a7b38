//! `@event` triggers.

use jobhub_core::events::Event;
use jobhub_core::traits::DocumentStore;

use super::rules::{EventRule, parse_rules};
use crate::error::JobResult;

/// A trigger firing on realtime events matching any of its rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTrigger {
    rules: Vec<EventRule>,
}

impl EventTrigger {
    /// Parse the space-separated rules of an `@event` trigger.
    pub fn parse(arguments: &str) -> JobResult<Self> {
        Ok(Self {
            rules: parse_rules(arguments)?,
        })
    }

    /// The parsed rules.
    pub fn rules(&self) -> &[EventRule] {
        &self.rules
    }

    /// Distinct doctypes to subscribe to.
    pub fn doctypes(&self) -> Vec<&str> {
        let mut doctypes: Vec<&str> = self.rules.iter().map(|r| r.doctype.as_str()).collect();
        doctypes.sort_unstable();
        doctypes.dedup();
        doctypes
    }

    /// Whether any rule matches the event.
    pub async fn matches(&self, store: &dyn DocumentStore, event: &Event) -> bool {
        for rule in &self.rules {
            if rule.matches(store, event).await {
                return true;
            }
        }
        false
    }
}
