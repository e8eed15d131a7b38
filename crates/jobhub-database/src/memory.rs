//! In-memory document store using dashmap.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use jobhub_core::error::AppError;
use jobhub_core::events::{Doc, Verb};
use jobhub_core::result::AppResult;
use jobhub_core::traits::{DocumentStore, RealtimeHub};
use jobhub_core::types::query::FindRequest;
use jobhub_core::Prefix;

type CollectionKey = (String, String);

/// In-process [`DocumentStore`].
///
/// Documents are kept per `(prefix, doctype)` ordered by id. When built with
/// a hub, every write is published on it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tenants: Arc<DashMap<String, Prefix>>,
    collections: Arc<DashMap<CollectionKey, BTreeMap<String, Value>>>,
    indexes: Arc<DashMap<CollectionKey, BTreeMap<String, Vec<String>>>>,
    hub: Option<Arc<dyn RealtimeHub>>,
}

impl MemoryStore {
    /// Create an empty store that publishes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that publishes its writes on `hub`.
    pub fn with_hub(hub: Arc<dyn RealtimeHub>) -> Self {
        Self {
            hub: Some(hub),
            ..Self::default()
        }
    }

    /// Register a tenant without writing any document.
    pub fn add_tenant(&self, prefix: &Prefix) {
        self.tenants
            .entry(prefix.prefix.clone())
            .or_insert_with(|| prefix.clone());
    }

    fn key(prefix: &Prefix, doctype: &str) -> CollectionKey {
        (prefix.prefix.clone(), doctype.to_string())
    }

    fn publish(&self, prefix: &Prefix, verb: Verb, doc: Doc, old: Option<Doc>) {
        if let Some(hub) = &self.hub {
            hub.publish(prefix, verb, doc, old);
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, prefix: &Prefix, doctype: &str, id: &str) -> AppResult<Doc> {
        self.collections
            .get(&Self::key(prefix, doctype))
            .and_then(|docs| docs.get(id).cloned())
            .map(|value| Doc::new(doctype, id, value))
            .ok_or_else(|| AppError::not_found(format!("{doctype}/{id} not found in {prefix}")))
    }

    async fn create(&self, prefix: &Prefix, doc: &mut Doc) -> AppResult<()> {
        if doc.id.is_empty() {
            doc.id = Uuid::now_v7().simple().to_string();
        }
        self.add_tenant(prefix);
        {
            let mut docs = self
                .collections
                .entry(Self::key(prefix, &doc.doctype))
                .or_default();
            if docs.contains_key(&doc.id) {
                return Err(AppError::conflict(format!(
                    "{}/{} already exists",
                    doc.doctype, doc.id
                )));
            }
            docs.insert(doc.id.clone(), doc.value.clone());
        }
        self.publish(prefix, Verb::Created, doc.clone(), None);
        Ok(())
    }

    async fn update(&self, prefix: &Prefix, doc: &Doc) -> AppResult<()> {
        let old = {
            let mut docs = self
                .collections
                .get_mut(&Self::key(prefix, &doc.doctype))
                .ok_or_else(|| AppError::not_found(format!("{}/{} not found", doc.doctype, doc.id)))?;
            let slot = docs
                .get_mut(&doc.id)
                .ok_or_else(|| AppError::not_found(format!("{}/{} not found", doc.doctype, doc.id)))?;
            std::mem::replace(slot, doc.value.clone())
        };
        let old = Doc::new(doc.doctype.clone(), doc.id.clone(), old);
        self.publish(prefix, Verb::Updated, doc.clone(), Some(old));
        Ok(())
    }

    async fn delete(&self, prefix: &Prefix, doc: &Doc) -> AppResult<()> {
        let removed = self
            .collections
            .get_mut(&Self::key(prefix, &doc.doctype))
            .and_then(|mut docs| docs.remove(&doc.id));
        match removed {
            Some(value) => {
                let deleted = Doc::new(doc.doctype.clone(), doc.id.clone(), value);
                self.publish(prefix, Verb::Deleted, deleted, None);
                Ok(())
            }
            None => Err(AppError::not_found(format!(
                "{}/{} not found",
                doc.doctype, doc.id
            ))),
        }
    }

    async fn find_docs(&self, prefix: &Prefix, req: &FindRequest) -> AppResult<Vec<Doc>> {
        let key = Self::key(prefix, &req.doctype);
        if let Some(index) = &req.index {
            let defined = self
                .indexes
                .get(&key)
                .is_some_and(|idx| idx.contains_key(index));
            if !defined {
                return Err(AppError::validation(format!(
                    "No index {index} on {} for {prefix}",
                    req.doctype
                )));
            }
        }

        let mut found: Vec<Doc> = match self.collections.get(&key) {
            Some(docs) => docs
                .iter()
                .filter(|(_, value)| req.matches(value))
                .map(|(id, value)| Doc::new(req.doctype.clone(), id.clone(), value.clone()))
                .collect(),
            None => Vec::new(),
        };

        if !req.sort.is_empty() {
            // Stable sort keeps id order between equal keys.
            found.sort_by(|a, b| {
                req.sort
                    .iter()
                    .map(|s| s.cmp_docs(&a.value, &b.value))
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        if let Some(limit) = req.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn foreach_docs(
        &self,
        prefix: &Prefix,
        doctype: &str,
        f: &mut (dyn FnMut(Doc) -> AppResult<()> + Send),
    ) -> AppResult<()> {
        let snapshot: Vec<(String, Value)> = match self.collections.get(&Self::key(prefix, doctype)) {
            Some(docs) => docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            None => return Ok(()),
        };
        for (id, value) in snapshot {
            f(Doc::new(doctype, id, value))?;
        }
        Ok(())
    }

    async fn define_index(
        &self,
        prefix: &Prefix,
        doctype: &str,
        name: &str,
        fields: &[&str],
    ) -> AppResult<()> {
        self.add_tenant(prefix);
        let mut idx = self.indexes.entry(Self::key(prefix, doctype)).or_default();
        if !idx.contains_key(name) {
            debug!(prefix = %prefix, doctype, index = name, "Defined index");
            idx.insert(name.to_string(), fields.iter().map(|f| f.to_string()).collect());
        }
        Ok(())
    }

    async fn prefixes(&self) -> AppResult<Vec<Prefix>> {
        let mut all: Vec<Prefix> = self.tenants.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        Ok(all)
    }
}
