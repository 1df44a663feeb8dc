//! Object storage abstraction for the repository
//!
//! Every persisted piece of repository state (content blobs, resource
//! records, projects, history) is a keyed object. This module provides the
//! core storage trait and the in-memory implementation used for testing
//! and ephemeral repositories.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstraction for object storage backends
///
/// A single `put` must be atomic: readers observe either the previous
/// object or the new one, never a torn write.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store data at the given key
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError>;

    /// Retrieve data by key
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Check if key exists
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Delete data by key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys starting with `prefix`, sorted
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Reject keys that could escape a backend's namespace
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|s| s == "..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// In-memory storage implementation
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
        }
    }

    /// Get all stored keys (useful for testing)
    pub fn keys(&self) -> Vec<String> {
        self.data
            .lock()
            .map(|data| data.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Get number of stored items
    pub fn len(&self) -> usize {
        self.data.lock().map(|data| data.len()).unwrap_or(0)
    }

    /// Check if storage is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryStorage {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut storage = self
            .data
            .lock()
            .map_err(|_| StorageError::Backend("Lock poisoned".into()))?;

        storage.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let storage = self
            .data
            .lock()
            .map_err(|_| StorageError::Backend("Lock poisoned".into()))?;

        storage
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let storage = self
            .data
            .lock()
            .map_err(|_| StorageError::Backend("Lock poisoned".into()))?;

        Ok(storage.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut storage = self
            .data
            .lock()
            .map_err(|_| StorageError::Backend("Lock poisoned".into()))?;

        storage.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let storage = self
            .data
            .lock()
            .map_err(|_| StorageError::Backend("Lock poisoned".into()))?;

        Ok(storage
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_basic_operations() {
        let storage = MemoryStorage::new();
        let key = "blobs/0001";
        let data = b"Hello, World!".to_vec();

        storage.put(key, data.clone()).await.unwrap();
        let retrieved = storage.get(key).await.unwrap();
        assert_eq!(data, retrieved);

        assert!(storage.exists(key).await.unwrap());
        assert!(!storage.exists("nonexistent").await.unwrap());

        storage.delete(key).await.unwrap();
        assert!(!storage.exists(key).await.unwrap());
        assert!(storage.get(key).await.is_err());

        // deleting twice is fine
        storage.delete(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_storage_not_found() {
        let storage = MemoryStorage::new();
        let result = storage.get("nonexistent").await;

        match result {
            Err(StorageError::NotFound(key)) => assert_eq!(key, "nonexistent"),
            _ => panic!("Expected NotFound error"),
        }
    }

    #[tokio::test]
    async fn test_list_keys_by_prefix() {
        let storage = MemoryStorage::new();
        storage.put("resources/offline/b.json", vec![1]).await.unwrap();
        storage.put("resources/offline/a.json", vec![2]).await.unwrap();
        storage.put("resources/online/a.json", vec![3]).await.unwrap();
        storage.put("projects/p.json", vec![4]).await.unwrap();

        let keys = storage.list_keys("resources/offline/").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "resources/offline/a.json".to_string(),
                "resources/offline/b.json".to_string()
            ]
        );
        assert_eq!(storage.list_keys("resources/").await.unwrap().len(), 3);
        assert!(storage.list_keys("history/").await.unwrap().is_empty());
        assert_eq!(storage.len(), 4);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.put("../etc/passwd", vec![]).await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            storage.put("/absolute", vec![]).await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(storage.is_empty());
    }
}
