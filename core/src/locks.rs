//! Per-key async locks.
//!
//! Serializes read-modify-write cycles for one session id while leaving
//! distinct ids fully parallel.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting behind any in-flight holder
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop the lock entry for `key` once nobody else holds a reference to it
    pub fn release(&self, key: &str) -> bool {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1)
            .is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.locks.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
