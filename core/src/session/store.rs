//! Session Store backends.

use super::state::GatewaySession;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::trace;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<GatewaySession>>;

    /// Write the whole session and (re)start its TTL
    async fn save(&self, session: &GatewaySession, ttl: Duration) -> Result<()>;

    async fn delete(&self, session_id: &str) -> Result<()>;

    /// Drop expired entries the backend does not expire itself
    async fn purge_expired(&self) -> Result<usize>;

    /// Backend label for health reporting
    fn backend(&self) -> &'static str;
}

struct Entry {
    session: GatewaySession,
    expires_at: Instant,
}

/// Process-memory store with lazy expiry on load
#[derive(Default)]
pub struct InMemorySessionStore {
    entries: DashMap<String, Entry>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<GatewaySession>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(session_id) {
            if entry.expires_at > now {
                return Ok(Some(entry.session.clone()));
            }
        }
        if self
            .entries
            .remove_if(session_id, |_, e| e.expires_at <= now)
            .is_some()
        {
            trace!(target: "session_store", session = %session_id, "Session expired");
        }
        Ok(None)
    }

    async fn save(&self, session: &GatewaySession, ttl: Duration) -> Result<()> {
        self.entries.insert(
            session.session_id.clone(),
            Entry {
                session: session.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.entries.remove(session_id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let store = InMemorySessionStore::new();
        let session = GatewaySession::new("s1", None, None);
        store.save(&session, Duration::from_millis(10)).await.unwrap();
        assert!(store.load("s1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.load("s1").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_save_refreshes_ttl_and_purge() {
        let store = InMemorySessionStore::new();
        store
            .save(&GatewaySession::new("short", None, None), Duration::from_millis(5))
            .await
            .unwrap();
        store
            .save(&GatewaySession::new("long", None, None), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.load("long").await.unwrap().is_some());
    }
}
