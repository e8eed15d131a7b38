//! `@webhook` triggers, fired from outside through
//! [`JobSystem::fire_trigger`](crate::system::JobSystem::fire_trigger).

use std::fmt;
use std::sync::Arc;

use jobhub_entity::job::Job;

use crate::error::JobResult;

/// Function invoked with each job a webhook pushes. Its value is returned
/// to the caller that fired the webhook.
pub type WebhookCallback = Arc<dyn Fn(&Job) -> JobResult<serde_json::Value> + Send + Sync>;

/// Trigger fired through an HTTP call, optionally answering with a callback.
#[derive(Clone, Default)]
pub struct WebhookTrigger {
    callback: Option<WebhookCallback>,
}

impl WebhookTrigger {
    /// Replace the callback.
    pub fn set_callback(&mut self, callback: WebhookCallback) {
        self.callback = Some(callback);
    }

    /// The callback, if one was set.
    pub fn callback(&self) -> Option<&WebhookCallback> {
        self.callback.as_ref()
    }
}

impl fmt::Debug for WebhookTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookTrigger")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
