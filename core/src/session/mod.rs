//! Session Store
//!
//! Gateway-side conversation state keyed by session id, bounded by a TTL.
//! Backends sit behind `SessionStore`; `SessionManager` serializes access.

mod manager;
#[cfg(feature = "redis")]
mod redis_store;
mod state;
mod store;

pub use manager::{SessionConfig, SessionManager};
#[cfg(feature = "redis")]
pub use redis_store::RedisSessionStore;
pub use state::{GatewaySession, IntakeFields, SessionStatus, StoredMessage};
pub use store::{InMemorySessionStore, SessionStore};
