//! Key-value storage for presence member lists.
//!
//! The store holds opaque bytes; the presence registry serializes member
//! lists to JSON before writing them.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed to read or write.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A stored value could not be encoded or decoded.
    #[error("Malformed stored value: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable byte storage shared by every server process.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Returns `None` if the key was never written.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
}

/// Process-local store, used for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_get_set() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get("missing").await.unwrap(), None);

        store.set("k", b"[1]".to_vec()).await.unwrap();
        store.set("k", b"[2]".to_vec()).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(b"[2]".to_vec()));
        assert_eq!(store.len(), 1);
    }
}
