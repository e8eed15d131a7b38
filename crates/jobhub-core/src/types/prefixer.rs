//! Tenant identification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one tenant of the platform.
///
/// `domain` is the public host name of the tenant, `prefix` is the key under
/// which its documents are stored. Both the document store and the Redis key
/// layout address a tenant by its prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Prefix {
    /// Public domain name, e.g. `alice.example.net`.
    pub domain: String,
    /// Storage prefix, e.g. `alice-example-net`.
    pub prefix: String,
}

impl Prefix {
    /// Create a tenant from its domain and storage prefix.
    pub fn new(domain: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            prefix: prefix.into(),
        }
    }

    /// Derive a tenant from its domain, computing the storage prefix.
    pub fn from_domain(domain: impl Into<String>) -> Self {
        let domain = domain.into();
        let prefix = domain
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        Self { domain, prefix }
    }

    /// Tenant known only by its storage prefix, as read back from a Redis key.
    pub fn from_db_prefix(prefix: impl Into<String>) -> Self {
        Self {
            domain: String::new(),
            prefix: prefix.into(),
        }
    }

    /// Name of the tenant's domain.
    pub fn domain_name(&self) -> &str {
        &self.domain
    }

    /// The storage prefix.
    pub fn db_prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the `"<prefix>/<id>"` key used by the Redis queues and sets.
    pub fn scoped(&self, id: &str) -> String {
        format!("{}/{}", self.prefix, id)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix)
    }
}
