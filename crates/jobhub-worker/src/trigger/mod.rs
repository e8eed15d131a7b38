//! Triggers: the sources of jobs.
//!
//! A [`Trigger`] is built from its persisted [`TriggerInfos`]; the type
//! discriminator selects one [`TriggerKind`] and the arguments are parsed
//! once, so an invalid trigger never reaches a scheduler.

pub mod at;
pub mod cron;
pub mod event;
pub mod every;
pub mod rules;
pub mod webhook;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use jobhub_core::events::Event;
use jobhub_core::{AppError, Prefix};
use jobhub_entity::job::{JobRequest, Message};
use jobhub_entity::trigger::TriggerInfos;

use crate::duration::parse_duration;
use crate::error::{JobError, JobResult};

pub use self::at::AtTrigger;
pub use self::cron::CronTrigger;
pub use self::event::EventTrigger;
pub use self::every::EveryTrigger;
pub use self::rules::EventRule;
pub use self::webhook::{WebhookCallback, WebhookTrigger};

/// Type discriminators, as stored in [`TriggerInfos::trigger_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerType {
    At,
    In,
    Cron,
    Every,
    Event,
    Webhook,
    Client,
}

impl TriggerType {
    /// Discriminator as stored in the trigger document.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::At => "@at",
            Self::In => "@in",
            Self::Cron => "@cron",
            Self::Every => "@every",
            Self::Event => "@event",
            Self::Webhook => "@webhook",
            Self::Client => "@client",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "@at" => Ok(Self::At),
            "@in" => Ok(Self::In),
            "@cron" => Ok(Self::Cron),
            "@every" => Ok(Self::Every),
            "@event" => Ok(Self::Event),
            "@webhook" => Ok(Self::Webhook),
            "@client" => Ok(Self::Client),
            other => Err(JobError::UnknownTrigger(other.to_string())),
        }
    }
}

/// Parsed behaviour of a trigger. `@in` resolves to an [`AtTrigger`].
#[derive(Debug, Clone)]
pub enum TriggerKind {
    At(AtTrigger),
    Cron(CronTrigger),
    Every(EveryTrigger),
    Event(EventTrigger),
    Webhook(WebhookTrigger),
    /// Fired only by explicit client requests.
    Client,
}

/// A validated trigger.
#[derive(Debug, Clone)]
pub struct Trigger {
    infos: TriggerInfos,
    trigger_type: TriggerType,
    debounce: Option<Duration>,
    kind: TriggerKind,
}

impl Trigger {
    /// Parse the type and arguments of `infos`.
    ///
    /// # Errors
    ///
    /// [`JobError::UnknownTrigger`] for an unknown type and
    /// [`JobError::MalformedTrigger`] for arguments that do not parse.
    pub fn new(infos: TriggerInfos) -> JobResult<Self> {
        let trigger_type: TriggerType = infos.trigger_type.parse()?;
        let args = infos.arguments.as_str();
        let kind = match trigger_type {
            TriggerType::At => TriggerKind::At(AtTrigger::parse_at(args)?),
            TriggerType::In => {
                let base = infos.created_at.unwrap_or_else(Utc::now);
                TriggerKind::At(AtTrigger::parse_in(args, base)?)
            }
            TriggerType::Cron => TriggerKind::Cron(CronTrigger::parse(args, &infos.id)?),
            TriggerType::Every => TriggerKind::Every(EveryTrigger::parse(args)?),
            TriggerType::Event => TriggerKind::Event(EventTrigger::parse(args)?),
            TriggerType::Webhook => TriggerKind::Webhook(WebhookTrigger::default()),
            TriggerType::Client => TriggerKind::Client,
        };
        let debounce = match infos.debounce.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(window) => Some(parse_duration(window)?).filter(|d| !d.is_zero()),
        };
        Ok(Self {
            infos,
            trigger_type,
            debounce,
            kind,
        })
    }

    /// Persisted document of the trigger.
    pub fn infos(&self) -> &TriggerInfos {
        &self.infos
    }

    /// Mutable access to the persisted document.
    pub fn infos_mut(&mut self) -> &mut TriggerInfos {
        &mut self.infos
    }

    /// Trigger identifier.
    pub fn id(&self) -> &str {
        &self.infos.id
    }

    /// Tenant owning the trigger.
    pub fn prefix(&self) -> &Prefix {
        &self.infos.prefix
    }

    /// Type discriminator.
    pub fn trigger_type(&self) -> TriggerType {
        self.trigger_type
    }

    /// Parsed behaviour.
    pub fn kind(&self) -> &TriggerKind {
        &self.kind
    }

    /// Debounce window of an event trigger.
    pub fn debounce(&self) -> Option<Duration> {
        self.debounce
    }

    /// Whether the trigger is deleted after firing once.
    pub fn is_one_shot(&self) -> bool {
        matches!(self.kind, TriggerKind::At(_))
    }

    /// Whether a scheduler fires the trigger on a clock.
    pub fn is_timed(&self) -> bool {
        matches!(
            self.kind,
            TriggerKind::At(_) | TriggerKind::Cron(_) | TriggerKind::Every(_)
        )
    }

    /// Next firing after `now` for timed triggers. A one-shot trigger
    /// always reports its instant, even a past one.
    pub fn next_execution(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            TriggerKind::At(at) => Some(at.at()),
            TriggerKind::Cron(cron) => cron.next_execution(now),
            TriggerKind::Every(every) => every.next_execution(now),
            _ => None,
        }
    }

    /// Request of one scheduled firing.
    pub fn job_request(&self) -> JobRequest {
        self.infos.job_request()
    }

    /// Request of a firing caused by `event`, attached to the job.
    pub fn event_request(&self, event: &Event) -> JobResult<JobRequest> {
        let mut req = self.job_request();
        req.event = Some(Message::new(event).map_err(AppError::from)?);
        Ok(req)
    }

    /// Request of a firing asked for by a client. A webhook attaches its
    /// payload as the job event.
    pub fn manual_request(&self, payload: Option<Message>) -> JobRequest {
        let mut req = self.job_request();
        req.manual = true;
        if matches!(self.kind, TriggerKind::Webhook(_)) {
            req.event = payload;
        }
        req
    }

    /// Attach the callback of a webhook trigger.
    pub fn set_callback(&mut self, callback: WebhookCallback) -> JobResult<()> {
        match &mut self.kind {
            TriggerKind::Webhook(webhook) => {
                webhook.set_callback(callback);
                Ok(())
            }
            _ => Err(JobError::Unsupported("callbacks are only set on @webhook triggers")),
        }
    }

    /// Callback of a webhook trigger, if one was set.
    pub fn callback(&self) -> Option<&WebhookCallback> {
        match &self.kind {
            TriggerKind::Webhook(webhook) => webhook.callback(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use jobhub_core::events::{Doc, Verb};
    use jobhub_entity::job::Job;

    use super::*;

    fn infos(ty: &str, args: &str) -> TriggerInfos {
        TriggerInfos::new(&Prefix::from_db_prefix("alice"), ty, "log", args)
    }

    #[test]
    fn test_variants() {
        assert!(matches!(Trigger::new(infos("@in", "10m")).unwrap().kind(), TriggerKind::At(_)));
        assert!(matches!(Trigger::new(infos("@every", "1h")).unwrap().kind(), TriggerKind::Every(_)));
        assert!(matches!(Trigger::new(infos("@client", "")).unwrap().kind(), TriggerKind::Client));
        assert!(matches!(
            Trigger::new(infos("@hourly", "")),
            Err(JobError::UnknownTrigger(_))
        ));
        assert!(matches!(
            Trigger::new(infos("@cron", "not a crontab")),
            Err(JobError::MalformedTrigger(_))
        ));
        assert!(matches!(
            Trigger::new(infos("@event", "io.jobhub.files").with_debounce("later")),
            Err(JobError::MalformedTrigger(_))
        ));
    }

    #[test]
    fn test_in_counts_from_creation() {
        let mut i = infos("@in", "1h");
        let created = Utc::now() - chrono::Duration::minutes(30);
        i.created_at = Some(created);
        let t = Trigger::new(i).unwrap();
        assert!(t.is_one_shot());
        assert_eq!(t.next_execution(Utc::now()), Some(created + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_requests() {
        let message = Message::new(&json!({"k": 1})).unwrap();
        let mut hook = Trigger::new(infos("@webhook", "").with_message(message.clone())).unwrap();
        let req = hook.manual_request(Some(Message::new(&json!({"body": true})).unwrap()));
        assert!(req.manual);
        assert_eq!(req.trigger_id.as_deref(), Some(hook.id()));
        assert_eq!(req.message, Some(message));
        assert!(req.event.is_some());

        hook.set_callback(Arc::new(|job: &Job| -> JobResult<serde_json::Value> {
            Ok(json!({"job": job.id}))
        }))
        .unwrap();
        assert!(hook.callback().is_some());

        let mut every = Trigger::new(infos("@every", "5s")).unwrap();
        assert!(every
            .set_callback(Arc::new(|_: &Job| -> JobResult<serde_json::Value> { Ok(json!(null)) }))
            .is_err());
        assert!(every.manual_request(None).event.is_none());

        let ev = Trigger::new(infos("@event", "io.jobhub.contacts").with_debounce("2s")).unwrap();
        assert_eq!(ev.debounce(), Some(Duration::from_secs(2)));
        let event = Event {
            prefix: Prefix::from_db_prefix("alice"),
            verb: Verb::Created,
            doc: Doc::new("io.jobhub.contacts", "c1", json!({})),
            old_doc: None,
        };
        let req = ev.event_request(&event).unwrap();
        let decoded: Event = req.event.unwrap().unmarshal().unwrap();
        assert_eq!(decoded.doc.id, "c1");
    }
}
