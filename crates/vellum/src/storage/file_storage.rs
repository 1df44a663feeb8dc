//! Directory-backed object storage
//!
//! Directory structure mirrors the key layout:
//! ```text
//! base_path/
//! ├── blobs/
//! │   └── <blob-id>
//! ├── resources/
//! │   ├── offline/<resource-id>.json
//! │   └── online/<resource-id>.json
//! ├── projects/<project-id>.json
//! ├── history/<resource-id>/<tag>.json
//! └── state/
//! ```

use super::object_store::{ObjectStore, StorageError, validate_key};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// File-based implementation of [`ObjectStore`]
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a new filesystem storage rooted at `base_path`
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    /// Root directory of this storage
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_path).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

#[async_trait]
impl ObjectStore for FileStorage {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a sibling temp file and rename so the put is atomic
        let tmp = path.with_file_name(format!(".tmp-{}", Uuid::new_v4()));
        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // Start from the deepest directory fully named by the prefix
        let dir_part = match prefix.rfind('/') {
            Some(pos) => &prefix[..pos],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.base_path.clone()
        } else {
            self.object_path(dir_part)?
        };
        if !fs::try_exists(&start).await? {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let is_tmp = entry
                    .file_name()
                    .to_str()
                    .map(|name| name.starts_with(".tmp-"))
                    .unwrap_or(true);
                if is_tmp {
                    continue;
                }
                if let Some(key) = self.key_for(&path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_storage_roundtrip() {
        let temp_dir = tempdir().unwrap();
        let storage = FileStorage::new(temp_dir.path()).await.unwrap();

        storage
            .put("resources/offline/a.json", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(
            storage.get("resources/offline/a.json").await.unwrap(),
            b"{}".to_vec()
        );
        assert!(storage.exists("resources/offline/a.json").await.unwrap());

        storage.delete("resources/offline/a.json").await.unwrap();
        assert!(!storage.exists("resources/offline/a.json").await.unwrap());
        assert!(matches!(
            storage.get("resources/offline/a.json").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_storage_lists_nested_keys() {
        let temp_dir = tempdir().unwrap();
        let storage = FileStorage::new(temp_dir.path()).await.unwrap();

        storage.put("history/r1/1.json", vec![1]).await.unwrap();
        storage.put("history/r1/2.json", vec![2]).await.unwrap();
        storage.put("history/r2/1.json", vec![3]).await.unwrap();
        storage.put("projects/p.json", vec![4]).await.unwrap();

        let keys = storage.list_keys("history/").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "history/r1/1.json".to_string(),
                "history/r1/2.json".to_string(),
                "history/r2/1.json".to_string(),
            ]
        );
        assert_eq!(storage.list_keys("history/r1/").await.unwrap().len(), 2);
        assert!(storage.list_keys("missing/").await.unwrap().is_empty());
    }
}
