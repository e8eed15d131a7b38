//! Persisted trigger description.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jobhub_core::events::Doc;
use jobhub_core::{AppError, Prefix};

use super::state::TriggerState;
use crate::doctypes;
use crate::job::{JobOptions, JobRequest, Message};

/// Everything needed to rebuild a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerInfos {
    /// Trigger identifier.
    #[serde(skip)]
    pub id: String,
    /// Tenant owning the trigger.
    pub prefix: Prefix,
    /// Type discriminator, e.g. `@cron`.
    #[serde(rename = "type")]
    pub trigger_type: String,
    /// Worker type of the jobs it produces.
    #[serde(rename = "worker")]
    pub worker_type: String,
    /// Type-specific arguments.
    #[serde(default)]
    pub arguments: String,
    /// Debounce window, as a duration string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce: Option<String>,
    /// Default options of produced jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<JobOptions>,
    /// Default message of produced jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// Creation time; `@in` triggers count from it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last known execution summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<TriggerState>,
}

impl TriggerInfos {
    /// Describe a new trigger with a fresh identifier.
    pub fn new(
        prefix: &Prefix,
        trigger_type: impl Into<String>,
        worker_type: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().simple().to_string(),
            prefix: prefix.clone(),
            trigger_type: trigger_type.into(),
            worker_type: worker_type.into(),
            arguments: arguments.into(),
            debounce: None,
            options: None,
            message: None,
            created_at: Some(Utc::now()),
            current_state: None,
        }
    }

    /// Set the default message.
    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    /// Set the debounce window.
    pub fn with_debounce(mut self, debounce: impl Into<String>) -> Self {
        self.debounce = Some(debounce.into());
        self
    }

    /// Set the default job options.
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// The job request produced by one firing.
    pub fn job_request(&self) -> JobRequest {
        JobRequest {
            worker_type: self.worker_type.clone(),
            trigger_id: Some(self.id.clone()),
            message: self.message.clone(),
            options: self.options.clone(),
            ..Default::default()
        }
    }

    /// Serialize into a store document.
    pub fn to_doc(&self) -> Result<Doc, AppError> {
        Ok(Doc::new(doctypes::TRIGGERS, self.id.clone(), serde_json::to_value(self)?))
    }

    /// Deserialize from a store document.
    pub fn from_doc(doc: Doc) -> Result<Self, AppError> {
        let mut infos: TriggerInfos = serde_json::from_value(doc.value)?;
        infos.id = doc.id;
        Ok(infos)
    }
}
