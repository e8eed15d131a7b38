//! Job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jobhub_core::events::Doc;
use jobhub_core::{AppError, Prefix};

use super::message::Message;
use super::options::JobOptions;
use super::request::JobRequest;
use super::status::JobState;
use crate::doctypes;

/// A persisted unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    #[serde(skip)]
    pub id: String,
    /// Tenant owning the job.
    pub prefix: Prefix,
    /// Worker type.
    #[serde(rename = "worker")]
    pub worker_type: String,
    /// Trigger that produced the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    /// Opaque payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// Realtime event that caused the job; cleared on terminal states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Message>,
    /// Execution options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<JobOptions>,
    /// Current state.
    pub state: JobState,
    /// When the job was queued.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub queued_at: DateTime<Utc>,
    /// When the job started executing.
    #[serde(
        default,
        with = "chrono::serde::ts_microseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(
        default,
        with = "chrono::serde::ts_microseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub finished_at: Option<DateTime<Utc>>,
    /// Error of the last attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Requested by a person.
    #[serde(default)]
    pub manual: bool,
    /// Produced after a debounce window.
    #[serde(default)]
    pub debounced: bool,
}

impl Job {
    /// Build a queued job from a request.
    pub fn from_request(prefix: &Prefix, req: &JobRequest) -> Self {
        Self {
            id: Uuid::now_v7().simple().to_string(),
            prefix: prefix.clone(),
            worker_type: req.worker_type.clone(),
            trigger_id: req.trigger_id.clone(),
            message: req.message.clone(),
            event: req.event.clone(),
            options: req.options.clone(),
            state: JobState::Queued,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            manual: req.manual,
            debounced: req.debounced,
        }
    }

    /// Enter the `Running` state.
    pub fn mark_running(&mut self) {
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
    }

    /// Enter the `Done` state.
    pub fn mark_done(&mut self) {
        self.state = JobState::Done;
        self.finished_at = Some(Utc::now());
        self.event = None;
        self.error = None;
    }

    /// Enter the `Errored` state, recording the error text.
    pub fn mark_errored(&mut self, error: impl Into<String>) {
        self.state = JobState::Errored;
        self.finished_at = Some(Utc::now());
        self.event = None;
        self.error = Some(error.into());
    }

    /// Serialize into a store document.
    pub fn to_doc(&self) -> Result<Doc, AppError> {
        Ok(Doc::new(doctypes::JOBS, self.id.clone(), serde_json::to_value(self)?))
    }

    /// Deserialize from a store document.
    pub fn from_doc(doc: Doc) -> Result<Self, AppError> {
        let mut job: Job = serde_json::from_value(doc.value)?;
        job.id = doc.id;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_round_trip_and_states() {
        let prefix = Prefix::new("alice.example.net", "alice");
        let mut req = JobRequest::new("log", Some(Message::from_json(r#"{"x":1}"#).unwrap()));
        req.trigger_id = Some("t1".into());
        req.event = Some(Message::from_json(r#"{"verb":"CREATED"}"#).unwrap());
        let mut job = Job::from_request(&prefix, &req);
        assert_eq!(job.state, JobState::Queued);

        let doc = job.to_doc().unwrap();
        assert_eq!(doc.value["worker"], "log");
        assert_eq!(doc.value["state"], "queued");
        let back = Job::from_doc(doc).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.message, job.message);

        job.mark_running();
        job.mark_errored("boom");
        assert_eq!(job.state, JobState::Errored);
        assert!(job.event.is_none());
        assert_eq!(job.error.as_deref(), Some("boom"));
    }
}
