//! Directory-of-files [`Storage`] backend, feature `backend-filesystem`.
//!
//! One file per key, named by the hex-encoded key (keys are already
//! opaque fingerprints from [`crate::key::create_key`], so no further
//! escaping is needed). Writes go through a temp-file-then-rename to avoid
//! torn reads under concurrent access,

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{CacheError, Result};
use crate::storage::Storage;

/// A `cache_name`-rooted directory, one file per key.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Opens (creating if absent) the directory at `cache_name`.
    pub fn new(cache_name: impl Into<PathBuf>) -> Result<Self> {
        let root = cache_name.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(hex::encode(key.as_bytes()))
    }
}

#[async_trait]
impl Storage for FilesystemBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::BackendUnavailable(e.to_string())),
        }
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let path = self.path_for(key);
        let tmp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        tokio::fs::write(tmp.path(), &value)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        tmp.persist(&path).map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::BackendUnavailable(e.to_string())),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        // File names are hex-encoded keys; we only know their digest form
        // here, so this returns the stored key strings (hex decode).
        self.list_entries(EntryKind::Key).await
    }

    async fn values(&self) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        while let Some(entry) = dir.next_entry().await.map_err(|e| CacheError::BackendUnavailable(e.to_string()))? {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                if let Ok(bytes) = tokio::fs::read(entry.path()).await {
                    out.push(bytes);
                }
            }
        }
        Ok(out)
    }

    async fn clear(&self) -> Result<()> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        while let Some(entry) = dir.next_entry().await.map_err(|e| CacheError::BackendUnavailable(e.to_string()))? {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }
}

enum EntryKind {
    Key,
}

impl FilesystemBackend {
    async fn list_entries(&self, _kind: EntryKind) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        while let Some(entry) = dir.next_entry().await.map_err(|e| CacheError::BackendUnavailable(e.to_string()))? {
            if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(decoded) = hex::decode(name) {
                    if let Ok(key) = String::from_utf8(decoded) {
                        out.push(key);
                    }
                }
            }
        }
        Ok(out)
    }
}
