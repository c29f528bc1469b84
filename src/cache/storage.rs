//! Durable key/value storage contract.
//!
//! The device-side store behind the persistent client cache and the affinity
//! profile. Values are opaque strings.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage i/o error: {0}")]
    Io(String),
    #[error("invalid storage key `{key}`: {reason}")]
    InvalidKey { key: String, reason: String },
}

impl StorageError {
    pub fn from_io(err: impl std::fmt::Display) -> Self {
        Self::Io(err.to_string())
    }
}

#[async_trait]
pub trait DurableStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing an absent key is not an error.
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    async fn all_keys(&self) -> Result<Vec<String>, StorageError>;

    async fn multi_remove(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            self.remove_item(key).await?;
        }
        Ok(())
    }
}

/// In-memory storage. Can be switched offline to exercise fail-open paths.
#[derive(Debug)]
pub struct MemoryStorage {
    items: DashMap<String, String>,
    available: AtomicBool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory storage offline".to_string()))
        }
    }
}

#[async_trait]
impl DurableStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.ensure_available()?;
        Ok(self.items.get(key).map(|value| value.clone()))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        self.items.remove(key);
        Ok(())
    }

    async fn all_keys(&self) -> Result<Vec<String>, StorageError> {
        self.ensure_available()?;
        let mut keys: Vec<String> = self.items.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        storage.set_item("b", "2").await.expect("set b");
        storage.set_item("a", "1").await.expect("set a");

        assert_eq!(storage.get_item("a").await.expect("get"), Some("1".into()));
        assert_eq!(storage.all_keys().await.expect("keys"), vec!["a", "b"]);

        storage
            .multi_remove(&["a".to_string(), "missing".to_string()])
            .await
            .expect("multi remove");
        assert_eq!(storage.all_keys().await.expect("keys"), vec!["b"]);
    }

    #[tokio::test]
    async fn offline_storage_errors() {
        let storage = MemoryStorage::new();
        storage.set_available(false);
        assert!(matches!(
            storage.get_item("a").await,
            Err(StorageError::Unavailable(_))
        ));
    }
}
