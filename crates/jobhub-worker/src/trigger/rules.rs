//! Event rules of `@event` triggers.
//!
//! A rule is written `doctype[:VERBS[:values[:selector]]]`, several rules
//! being separated by spaces:
//!
//! ```text
//! io.jobhub.files:CREATED,UPDATED:d4c1,d4c2
//! io.jobhub.contacts:UPDATED:!=:email
//! io.jobhub.accounts:DELETED:google:account_type
//! ```
//!
//! Empty verbs match every verb. Without a selector, the values are
//! document ids; for files they are directory ids and the rule matches
//! anything below those directories.

use std::fmt;

use serde_json::Value;

use jobhub_core::events::{Doc, Event, Verb};
use jobhub_core::traits::DocumentStore;
use jobhub_core::types::query::lookup;
use jobhub_core::Prefix;
use jobhub_entity::doctypes;

use crate::error::{JobError, JobResult};

/// Value meaning "the selected field changed".
pub const CHANGED: &str = "!=";

/// One doctype/verbs/values filter on realtime events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRule {
    /// Doctype of the watched documents.
    pub doctype: String,
    /// Accepted verbs; empty accepts all.
    pub verbs: Vec<Verb>,
    /// Accepted values.
    pub values: Vec<String>,
    /// Dotted field path compared with the values.
    pub selector: Option<String>,
}

/// Parse the space separated rules of a trigger.
pub fn parse_rules(arguments: &str) -> JobResult<Vec<EventRule>> {
    let rules = arguments
        .split_whitespace()
        .map(EventRule::parse)
        .collect::<JobResult<Vec<_>>>()?;
    if rules.is_empty() {
        return Err(JobError::MalformedTrigger("@event needs at least one rule".into()));
    }
    Ok(rules)
}

fn split_list(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|v| !v.is_empty())
}

impl EventRule {
    /// Parse one rule.
    pub fn parse(rule: &str) -> JobResult<Self> {
        let mut parts = rule.splitn(4, ':');
        let doctype = parts.next().unwrap_or_default().trim();
        if doctype.is_empty() {
            return Err(JobError::MalformedTrigger(format!("rule {rule:?} has no doctype")));
        }
        let verbs = split_list(parts.next().unwrap_or_default())
            .map(|v| {
                v.parse::<Verb>()
                    .map_err(|err| JobError::MalformedTrigger(format!("rule {rule:?}: {err}")))
            })
            .collect::<JobResult<Vec<_>>>()?;
        let values: Vec<String> = split_list(parts.next().unwrap_or_default())
            .map(str::to_string)
            .collect();
        let selector = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        if values.iter().any(|v| v == CHANGED) && (selector.is_none() || values.len() > 1) {
            return Err(JobError::MalformedTrigger(format!(
                "rule {rule:?}: {CHANGED} must be the only value and needs a selector"
            )));
        }
        Ok(Self {
            doctype: doctype.to_string(),
            verbs,
            values,
            selector,
        })
    }

    /// Whether the event satisfies the rule. File rules without selector
    /// may read parent directories from `store`.
    pub async fn matches(&self, store: &dyn DocumentStore, event: &Event) -> bool {
        if event.doc.doctype != self.doctype {
            return false;
        }
        if !self.verbs.is_empty() && !self.verbs.contains(&event.verb) {
            return false;
        }
        if self.values.is_empty() {
            return true;
        }

        match &self.selector {
            Some(selector) if self.values[0] == CHANGED => match &event.old_doc {
                Some(old) => lookup(&event.doc.value, selector) != lookup(&old.value, selector),
                None => false,
            },
            Some(selector) => {
                self.field_matches(&event.doc, selector)
                    || event
                        .old_doc
                        .as_ref()
                        .is_some_and(|old| self.field_matches(old, selector))
            }
            None if self.doctype == doctypes::FILES => self.below_directories(store, event).await,
            None => self.values.contains(&event.doc.id),
        }
    }

    fn field_matches(&self, doc: &Doc, selector: &str) -> bool {
        match lookup(&doc.value, selector) {
            Some(Value::Array(items)) => items.iter().any(|item| self.value_listed(item)),
            Some(value) => self.value_listed(value),
            None => false,
        }
    }

    fn value_listed(&self, value: &Value) -> bool {
        match value {
            Value::String(s) => self.values.iter().any(|v| v == s),
            Value::Number(_) | Value::Bool(_) => {
                let s = value.to_string();
                self.values.iter().any(|v| *v == s)
            }
            _ => false,
        }
    }

    async fn below_directories(&self, store: &dyn DocumentStore, event: &Event) -> bool {
        let revisions: Vec<&Doc> = std::iter::once(&event.doc)
            .chain(event.old_doc.as_ref())
            .collect();

        let listed = |id: Option<&str>| id.is_some_and(|id| self.values.iter().any(|v| v == id));
        if revisions
            .iter()
            .any(|doc| listed(Some(doc.id.as_str())) || listed(doc.str_field("dir_id")))
        {
            return true;
        }

        let mut paths = Vec::with_capacity(revisions.len());
        for doc in revisions {
            if let Some(path) = file_path(store, &event.prefix, doc).await {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return false;
        }

        for dir_id in &self.values {
            let Some(dir_path) = directory_path(store, &event.prefix, dir_id).await else {
                continue;
            };
            let below = format!("{}/", dir_path.trim_end_matches('/'));
            if paths.iter().any(|p| p.starts_with(&below)) {
                return true;
            }
        }
        false
    }
}

async fn directory_path(store: &dyn DocumentStore, prefix: &Prefix, id: &str) -> Option<String> {
    match store.get(prefix, doctypes::FILES, id).await {
        Ok(dir) => dir.str_field("path").map(str::to_string),
        Err(err) => {
            tracing::debug!(dir_id = id, error = %err, "Cannot resolve directory of event rule");
            None
        }
    }
}

/// Full path of a file or directory revision. Directories carry it; files
/// are resolved through their parent directory.
async fn file_path(store: &dyn DocumentStore, prefix: &Prefix, doc: &Doc) -> Option<String> {
    if let Some(path) = doc.str_field("path") {
        return Some(path.to_string());
    }
    let dir_id = doc.str_field("dir_id")?;
    let name = doc.str_field("name").unwrap_or_default();
    let parent = directory_path(store, prefix, dir_id).await?;
    Some(format!("{}/{name}", parent.trim_end_matches('/')))
}

impl fmt::Display for EventRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.doctype)?;
        if self.verbs.is_empty() && self.values.is_empty() && self.selector.is_none() {
            return Ok(());
        }
        let verbs: Vec<&str> = self.verbs.iter().map(Verb::as_str).collect();
        write!(f, ":{}", verbs.join(","))?;
        if self.values.is_empty() && self.selector.is_none() {
            return Ok(());
        }
        write!(f, ":{}", self.values.join(","))?;
        if let Some(selector) = &self.selector {
            write!(f, ":{selector}")?;
        }
        Ok(())
    }
}
