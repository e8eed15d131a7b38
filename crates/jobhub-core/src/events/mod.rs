//! Realtime change events.
//!
//! Every write to the document store is announced on the realtime hub as an
//! [`Event`]. Event triggers subscribe to these events to fire jobs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::types::prefixer::Prefix;

/// What happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    /// The document was created.
    Created,
    /// The document was updated.
    Updated,
    /// The document was deleted.
    Deleted,
    /// A notification about the document, without a write.
    Notified,
}

impl Verb {
    /// Return the wire representation of this verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
            Self::Notified => "NOTIFIED",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Verb {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Self::Created),
            "UPDATED" => Ok(Self::Updated),
            "DELETED" => Ok(Self::Deleted),
            "NOTIFIED" => Ok(Self::Notified),
            other => Err(AppError::validation(format!("Unknown verb: {other}"))),
        }
    }
}

/// A JSON document of a given doctype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doc {
    /// Doctype, e.g. `io.jobhub.files`.
    pub doctype: String,
    /// Document identifier.
    pub id: String,
    /// Document body.
    pub value: Value,
}

impl Doc {
    /// Build a document.
    pub fn new(doctype: impl Into<String>, id: impl Into<String>, value: Value) -> Self {
        Self {
            doctype: doctype.into(),
            id: id.into(),
            value,
        }
    }

    /// Read a top-level string field.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.value.get(name).and_then(Value::as_str)
    }
}

/// A change of one document, as published on the realtime hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Tenant owning the document.
    pub prefix: Prefix,
    /// Kind of change.
    pub verb: Verb,
    /// New revision (or the deleted one).
    pub doc: Doc,
    /// Previous revision, for updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_doc: Option<Doc>,
}
