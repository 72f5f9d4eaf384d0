use super::state::GatewaySession;
use super::store::SessionStore;
use crate::locks::KeyedLocks;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Configuration for gateway sessions
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    pub max_messages: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: std::env::var("SESSION_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(3600),
            max_messages: std::env::var("MAX_SESSION_MESSAGES")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(100),
        }
    }
}

/// Single arbitration point over the Session Store.
///
/// `lock` gives a caller exclusive use of one session id across several
/// `get`/`save` calls. `update` and `remove` take the lock themselves and must
/// not be called while holding it.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    locks: KeyedLocks,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            ttl,
        }
    }

    pub async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(session_id).await
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<GatewaySession>> {
        self.store.load(session_id).await
    }

    pub async fn save(&self, session: &GatewaySession) -> Result<()> {
        self.store.save(session, self.ttl).await
    }

    pub async fn insert(&self, session: GatewaySession) -> Result<()> {
        let _guard = self.locks.lock(&session.session_id).await;
        self.store.save(&session, self.ttl).await
    }

    /// Read-modify-write under the session lock. `None` when the session is gone.
    pub async fn update<F, T>(&self, session_id: &str, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut GatewaySession) -> T + Send,
        T: Send,
    {
        let _guard = self.locks.lock(session_id).await;
        let Some(mut session) = self.store.load(session_id).await? else {
            return Ok(None);
        };
        let out = f(&mut session);
        self.store.save(&session, self.ttl).await?;
        Ok(Some(out))
    }

    pub async fn remove(&self, session_id: &str) -> Result<()> {
        {
            let _guard = self.locks.lock(session_id).await;
            self.store.delete(session_id).await?;
        }
        self.locks.release(session_id);
        debug!(target: "session_store", session = %session_id, "Session removed");
        Ok(())
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        self.store.purge_expired().await
    }

    /// Release idle lock entries whose session no longer loads
    pub async fn prune_locks(&self) -> Result<usize> {
        let mut released = 0;
        for session_id in self.locks.keys() {
            if self.store.load(&session_id).await?.is_none() && self.locks.release(&session_id) {
                released += 1;
            }
        }
        Ok(released)
    }

    pub fn lock_entries(&self) -> usize {
        self.locks.len()
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{InMemorySessionStore, SessionStatus};

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(InMemorySessionStore::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_update_missing_returns_none() {
        let sessions = manager();
        let out = sessions
            .update("ghost", |s| s.status = SessionStatus::Failed)
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_updates_serialize() {
        let sessions = Arc::new(manager());
        sessions
            .insert(GatewaySession::new("s1", None, None))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let sessions = sessions.clone();
            handles.push(tokio::spawn(async move {
                sessions
                    .update("s1", move |s| {
                        s.messages.push(crate::session::StoredMessage::user(format!("m{}", i)))
                    })
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let session = sessions.get("s1").await.unwrap().unwrap();
        assert_eq!(session.messages.len(), 10);
    }

    #[tokio::test]
    async fn test_prune_locks_keeps_live_and_held_entries() {
        let sessions = SessionManager::new(
            Arc::new(InMemorySessionStore::new()),
            Duration::from_millis(200),
        );
        for id in ["a", "b"] {
            sessions.insert(GatewaySession::new(id, None, None)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        sessions.insert(GatewaySession::new("live", None, None)).await.unwrap();
        let held = sessions.lock("new").await;

        assert_eq!(sessions.prune_locks().await.unwrap(), 2);
        assert_eq!(sessions.lock_entries(), 2);

        drop(held);
        assert_eq!(sessions.prune_locks().await.unwrap(), 1);
        assert_eq!(sessions.lock_entries(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let sessions = manager();
        sessions
            .insert(GatewaySession::new("s1", None, None))
            .await
            .unwrap();
        sessions.remove("s1").await.unwrap();
        sessions.remove("s1").await.unwrap();
        assert!(sessions.get("s1").await.unwrap().is_none());
    }
}
