//! Redis-backed Session Store.
//!
//! Entries live under `session:{id}` as JSON with `SETEX`. Any Redis error
//! falls back to process memory so a cache outage never drops a turn.

use super::state::GatewaySession;
use super::store::{InMemorySessionStore, SessionStore};
use crate::{AgroError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{error, info};

pub struct RedisSessionStore {
    conn: ConnectionManager,
    fallback: InMemorySessionStore,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AgroError::Store(format!("invalid redis url: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AgroError::Store(format!("redis connection failed: {}", e)))?;
        info!(target: "session_store", "Connected to Redis session store");
        Ok(Self {
            conn,
            fallback: InMemorySessionStore::new(),
        })
    }

    fn key(session_id: &str) -> String {
        format!("session:{}", session_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<GatewaySession>> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(Self::key(session_id)).await {
            Ok(Some(raw)) => Ok(Some(serde_json::from_str(&raw)?)),
            Ok(None) => self.fallback.load(session_id).await,
            Err(e) => {
                error!(target: "session_store", session = %session_id, error = %e, "Redis read failed; using memory fallback");
                self.fallback.load(session_id).await
            }
        }
    }

    async fn save(&self, session: &GatewaySession, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(session)?;
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1) as usize;
        match conn
            .set_ex::<_, _, ()>(Self::key(&session.session_id), raw, secs)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(target: "session_store", session = %session.session_id, error = %e, "Redis write failed; using memory fallback");
                self.fallback.save(session, ttl).await
            }
        }
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(Self::key(session_id)).await {
            error!(target: "session_store", session = %session_id, error = %e, "Redis delete failed");
        }
        self.fallback.delete(session_id).await
    }

    async fn purge_expired(&self) -> Result<usize> {
        // Redis expires its own keys
        self.fallback.purge_expired().await
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
