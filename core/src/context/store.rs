//! Context record storage.
//!
//! The bus owns arbitration; a store only holds whole records keyed by
//! session id.

use crate::context::record::ContextRecord;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<ContextRecord>>;

    /// Replace the whole record for its session id
    async fn save(&self, record: ContextRecord) -> Result<()>;

    /// Insert only when absent; returns the record now stored
    async fn insert_if_absent(&self, record: ContextRecord) -> Result<ContextRecord>;

    async fn remove(&self, session_id: &str) -> Result<Option<ContextRecord>>;

    /// Snapshot of every record (for sweeping)
    async fn records(&self) -> Result<Vec<ContextRecord>>;

    async fn count(&self) -> Result<usize>;
}

/// In-process store. One process, no durability.
#[derive(Debug, Default)]
pub struct InMemoryContextStore {
    records: DashMap<String, ContextRecord>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn load(&self, session_id: &str) -> Result<Option<ContextRecord>> {
        Ok(self.records.get(session_id).map(|e| e.value().clone()))
    }

    async fn save(&self, record: ContextRecord) -> Result<()> {
        trace!(target: "context_bus", session = %record.session_id, "Saving context record");
        self.records.insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn insert_if_absent(&self, record: ContextRecord) -> Result<ContextRecord> {
        let entry = self
            .records
            .entry(record.session_id.clone())
            .or_insert(record);
        Ok(entry.value().clone())
    }

    async fn remove(&self, session_id: &str) -> Result<Option<ContextRecord>> {
        Ok(self.records.remove(session_id).map(|(_, r)| r))
    }

    async fn records(&self) -> Result<Vec<ContextRecord>> {
        Ok(self.records.iter().map(|e| e.value().clone()).collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first() {
        let store = InMemoryContextStore::new();
        store
            .insert_if_absent(ContextRecord::new("s1", "first", "Nakuru"))
            .await
            .unwrap();
        let kept = store
            .insert_if_absent(ContextRecord::new("s1", "second", "Kisumu"))
            .await
            .unwrap();

        assert_eq!(kept.query, "first");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_is_none() {
        let store = InMemoryContextStore::new();
        assert!(store.remove("nope").await.unwrap().is_none());
    }
}
