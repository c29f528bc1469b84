//! File-backed durable storage.
//!
//! One file per key under a root directory. File names are the hex encoding of
//! the key, so any key is representable and listing can recover it exactly.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use crate::cache::{DurableStorage, StorageError};

const ENTRY_EXTENSION: &str = "entry";
const TEMP_EXTENSION: &str = "tmp";

#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Opens storage rooted at `root`, creating the directory if necessary.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
                reason: "key must not be empty".to_string(),
            });
        }
        Ok(self
            .root
            .join(format!("{}.{ENTRY_EXTENSION}", hex::encode(key.as_bytes()))))
    }
}

fn key_from_path(path: &Path) -> Option<String> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let bytes = hex::decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

#[async_trait]
impl DurableStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::from_io(err)),
        }
    }

    /// Writes through a temporary file and renames it into place, so readers
    /// never observe a partial value.
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let temp = self
            .root
            .join(format!("{}.{TEMP_EXTENSION}", Uuid::new_v4()));

        let mut file = fs::File::create(&temp).await.map_err(StorageError::from_io)?;
        let written = async {
            file.write_all(value.as_bytes()).await?;
            file.flush().await
        }
        .await;
        drop(file);
        if let Err(err) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::from_io(err));
        }

        if let Err(err) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::from_io(err));
        }
        debug!(key, bytes = value.len(), "Storage entry written");
        Ok(())
    }

    /// Missing entries are treated as success.
    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::from_io(err)),
        }
    }

    async fn all_keys(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(StorageError::from_io)?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(StorageError::from_io)? {
            if let Some(key) = key_from_path(&entry.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn storage() -> (TempDir, FileStorage) {
        let dir = TempDir::new().expect("temp dir");
        let storage = FileStorage::new(dir.path().join("store")).expect("storage");
        (dir, storage)
    }

    #[tokio::test]
    async fn round_trips_arbitrary_keys() {
        let (_dir, storage) = storage();
        let key = "@affinity_profile:7/../기쁨";

        storage.set_item(key, "{\"a\":1}").await.expect("set");
        assert_eq!(
            storage.get_item(key).await.expect("get").as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(storage.all_keys().await.expect("keys"), vec![key.to_string()]);
    }

    #[tokio::test]
    async fn overwrite_replaces_value() {
        let (_dir, storage) = storage();
        storage.set_item("k", "one").await.expect("set");
        storage.set_item("k", "two").await.expect("set");
        assert_eq!(storage.get_item("k").await.expect("get").as_deref(), Some("two"));
        assert_eq!(storage.all_keys().await.expect("keys").len(), 1);
    }

    #[tokio::test]
    async fn missing_entries_read_as_none_and_remove_cleanly() {
        let (_dir, storage) = storage();
        assert_eq!(storage.get_item("absent").await.expect("get"), None);
        storage.remove_item("absent").await.expect("remove");
    }

    #[tokio::test]
    async fn multi_remove_and_listing_ignore_foreign_files() {
        let (_dir, storage) = storage();
        storage.set_item("cache_a", "1").await.expect("set");
        storage.set_item("cache_b", "2").await.expect("set");
        storage.set_item("other", "3").await.expect("set");
        std::fs::write(storage.root().join("README"), "not an entry").expect("write");

        storage
            .multi_remove(&["cache_a".to_string(), "cache_b".to_string()])
            .await
            .expect("multi remove");
        assert_eq!(storage.all_keys().await.expect("keys"), vec!["other".to_string()]);
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let (_dir, storage) = storage();
        let err = storage.set_item("", "x").await.expect_err("empty key");
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }
}
