//! The Context Bus.
//!
//! All reads and writes of a session's `ContextRecord` go through here.
//! Updates for one session id are serialized by a keyed lock; the merged
//! record replaces the stored one in a single save.

use crate::context::record::{ContextRecord, ContextUpdate};
use crate::context::store::{ContextStore, InMemoryContextStore};
use crate::locks::KeyedLocks;
use crate::{AgroError, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub struct ContextBus {
    store: Arc<dyn ContextStore>,
    locks: KeyedLocks,
}

impl Default for ContextBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBus {
    /// Bus backed by the in-process store
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryContextStore::new()))
    }

    pub fn with_store(store: Arc<dyn ContextStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// Create the record for `session_id`, or return the existing one untouched
    #[instrument(skip(self, query, region), fields(session = %session_id), target = "context_bus")]
    pub async fn create_session(
        &self,
        session_id: &str,
        query: &str,
        region: &str,
    ) -> Result<ContextRecord> {
        let _guard = self.locks.lock(session_id).await;
        let record = self
            .store
            .insert_if_absent(ContextRecord::new(session_id, query, region))
            .await?;
        debug!(target: "context_bus", session = %session_id, region = %record.region, "Context session ready");
        Ok(record)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<ContextRecord>> {
        self.store.load(session_id).await
    }

    /// Apply a sparse update and return the full post-update record
    #[instrument(skip(self, update), fields(session = %session_id), target = "context_bus")]
    pub async fn update(&self, session_id: &str, update: ContextUpdate) -> Result<ContextRecord> {
        let _guard = self.locks.lock(session_id).await;

        let mut record = self
            .store
            .load(session_id)
            .await?
            .ok_or_else(|| AgroError::SessionNotFound(session_id.to_string()))?;

        if let Err(e) = update.apply_to(&mut record) {
            warn!(target: "context_bus", session = %session_id, error = %e, "Rejected context update");
            return Err(e);
        }

        self.store.save(record.clone()).await?;
        Ok(record)
    }

    /// Human-readable snapshot: counts and labels only, no document bodies
    pub async fn summary(&self, session_id: &str) -> Result<String> {
        let record = self.require(session_id).await?;

        let keys: Vec<&str> = record.regional_data.keys().map(String::as_str).collect();
        let status = if record.is_diagnosis_complete() {
            "COMPLETE"
        } else {
            "PENDING"
        };
        let severity = record
            .alert_severity
            .map(|s| s.as_str())
            .unwrap_or("N/A");

        Ok(format!(
            "--- CONTEXT BUS STATE (Session: {}) ---\n\
             [INPUT] Query: {}\n\
             [INPUT] Region: {}\n\
             [ROUTING] Asset Category: {} | Asset Name: {} | Intent: {}\n\
             [KNOWLEDGE] Documents Retrieved: {}\n\
             [ENVIRONMENTAL] Regional Data Keys: [{}]\n\
             [OUTPUT] Diagnosis Status: {}\n\
             [ACTION] Alert Triggered: {} (Severity: {})\n\
             ------------------------------------------------",
            record.session_id,
            record.query,
            record.region,
            record.asset_category,
            record.asset_name.as_deref().unwrap_or("N/A"),
            record.intent,
            record.retrieved_documents.len(),
            keys.join(", "),
            status,
            record.alert_triggered,
            severity,
        ))
    }

    /// Full record as a plain mapping with enums rendered as strings
    pub async fn export_for_task(&self, session_id: &str) -> Result<Map<String, Value>> {
        let record = self.require(session_id).await?;
        match serde_json::to_value(&record)? {
            Value::Object(map) => Ok(map),
            other => Err(AgroError::Store(format!(
                "context record serialized to non-object: {}",
                other
            ))),
        }
    }

    /// Remove the record. No-op for unknown ids.
    #[instrument(skip(self), fields(session = %session_id), target = "context_bus")]
    pub async fn clear(&self, session_id: &str) -> Result<()> {
        {
            let _guard = self.locks.lock(session_id).await;
            if self.store.remove(session_id).await?.is_some() {
                debug!(target: "context_bus", session = %session_id, "Context session cleared");
            }
        }
        self.locks.release(session_id);
        Ok(())
    }

    /// Drop records created more than `ttl` ago. Returns how many went.
    pub async fn purge_expired(&self, ttl: Duration) -> Result<usize> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AgroError::Store(format!("invalid ttl: {}", e)))?;
        let cutoff = Utc::now() - ttl;

        let stale: Vec<String> = self
            .store
            .records()
            .await?
            .into_iter()
            .filter(|r| r.created_at < cutoff)
            .map(|r| r.session_id)
            .collect();

        for id in &stale {
            self.clear(id).await?;
        }

        if !stale.is_empty() {
            info!(target: "context_bus", purged = stale.len(), "Purged expired context records");
        }
        Ok(stale.len())
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.count().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn require(&self, session_id: &str) -> Result<ContextRecord> {
        self.store
            .load(session_id)
            .await?
            .ok_or_else(|| AgroError::SessionNotFound(session_id.to_string()))
    }
}
