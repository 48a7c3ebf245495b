//! In-memory snapshot store
//!
//! Same contract as the SQLite store, without durability. Used for
//! ephemeral sessions and as the default store in tests.

use super::{Snapshot, SnapshotKey, SnapshotStore};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Snapshot store held in process memory
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    records: RwLock<BTreeMap<SnapshotKey, Snapshot>>,
}

impl InMemorySnapshotStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn put(&self, snapshot: &Snapshot) -> Result<()> {
        self.records
            .write()
            .await
            .insert(snapshot.key(), snapshot.clone());
        Ok(())
    }

    async fn get(&self, chat_key: &str, timestamp: i64) -> Result<Option<Snapshot>> {
        let key = SnapshotKey::new(chat_key, timestamp);
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn get_by_chat_key(&self, chat_key: &str) -> Result<Vec<Snapshot>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|s| s.chat_key == chat_key)
            .cloned()
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<Snapshot>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn get_all_keys(&self) -> Result<Vec<SnapshotKey>> {
        Ok(self.records.read().await.keys().cloned().collect())
    }

    async fn delete(&self, chat_key: &str, timestamp: i64) -> Result<()> {
        let key = SnapshotKey::new(chat_key, timestamp);
        self.records.write().await.remove(&key);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}
