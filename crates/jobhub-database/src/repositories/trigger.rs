//! Trigger repository implementation.

use std::sync::Arc;

use jobhub_core::error::{AppError, ErrorKind};
use jobhub_core::result::AppResult;
use jobhub_core::traits::DocumentStore;
use jobhub_core::Prefix;
use jobhub_entity::doctypes;
use jobhub_entity::trigger::TriggerInfos;

/// Repository for trigger documents.
#[derive(Debug, Clone)]
pub struct TriggerRepository {
    store: Arc<dyn DocumentStore>,
}

impl TriggerRepository {
    /// Create a new trigger repository.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Persist a new trigger.
    pub async fn create(&self, infos: &mut TriggerInfos) -> AppResult<()> {
        let mut doc = infos.to_doc()?;
        self.store
            .create(&infos.prefix, &mut doc)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create trigger", e))?;
        infos.id = doc.id;
        Ok(())
    }

    /// Find a trigger by ID.
    pub async fn get(&self, prefix: &Prefix, id: &str) -> AppResult<TriggerInfos> {
        let doc = self.store.get(prefix, doctypes::TRIGGERS, id).await?;
        TriggerInfos::from_doc(doc)
    }

    /// Replace a stored trigger.
    pub async fn update(&self, infos: &TriggerInfos) -> AppResult<()> {
        self.store.update(&infos.prefix, &infos.to_doc()?).await
    }

    /// Delete a trigger.
    pub async fn delete(&self, infos: &TriggerInfos) -> AppResult<()> {
        self.store.delete(&infos.prefix, &infos.to_doc()?).await
    }

    /// Every trigger of a tenant.
    pub async fn all(&self, prefix: &Prefix) -> AppResult<Vec<TriggerInfos>> {
        let mut docs = Vec::new();
        self.store
            .foreach_docs(prefix, doctypes::TRIGGERS, &mut |doc| {
                docs.push(doc);
                Ok(())
            })
            .await?;
        docs.into_iter().map(TriggerInfos::from_doc).collect()
    }

    /// Tenants known to the store.
    pub async fn prefixes(&self) -> AppResult<Vec<Prefix>> {
        self.store.prefixes().await
    }
}
