use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{OwnerRecord, OwnerUpdate, PersistenceAdapter, PersistenceError};
use crate::workflow::types::OwnerId;

/// Process-local record store, used when no database is configured and in tests
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    records: RwLock<HashMap<OwnerId, OwnerRecord>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record, e.g. to simulate state left behind by a previous process
    pub async fn insert_record(&self, record: OwnerRecord) {
        self.records
            .write()
            .await
            .insert(record.owner_id.clone(), record);
    }

    pub async fn record(&self, owner_id: &OwnerId) -> Option<OwnerRecord> {
        self.records.read().await.get(owner_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistence {
    async fn update(&self, owner_id: &OwnerId, update: OwnerUpdate) -> Result<(), PersistenceError> {
        let mut records = self.records.write().await;
        let at = update.updated_at;
        records
            .entry(owner_id.clone())
            .or_insert_with(|| OwnerRecord::empty(owner_id.clone(), at))
            .apply(update);

        debug!(owner_id = %owner_id, "Owner record updated");
        Ok(())
    }

    async fn pending_records(&self) -> Result<Vec<OwnerRecord>, PersistenceError> {
        let mut pending: Vec<OwnerRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.needs_resume())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.owner_id.cmp(&b.owner_id));
        Ok(pending)
    }
}
