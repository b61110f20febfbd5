//! Persistent key-value store boundary.
//!
//! Values are opaque JSON strings; the recovery layer owns the key schema.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("persistent store backend failed: {0}")]
    Backend(String),
}

/// Async key-value storage consumed by the state recovery store.
///
/// Implementations are expected to be eventually consistent; no cross-key
/// transactions are required.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    async fn remove_many(&self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }
}

/// In-process store backed by a mutex-guarded map.
///
/// The embedded default, and the collaborator of choice in tests. The
/// mutex is never held across an await point.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.entries
            .lock()
            .map(|map| map.get(key).cloned())
            .map_err(|_| StoreError::Backend("store mutex poisoned".into()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map(|mut map| {
                map.insert(key.to_string(), value.to_string());
            })
            .map_err(|_| StoreError::Backend("store mutex poisoned".into()))
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map(|mut map| {
                map.remove(key);
            })
            .map_err(|_| StoreError::Backend("store mutex poisoned".into()))
    }
}
