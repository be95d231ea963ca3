//! The async key-value contract every backend implements.

use async_trait::async_trait;

use crate::error::Result;

/// A pluggable async key-value store. Each [`crate::facade::CacheBackend`]
/// holds two `Storage` instances (`responses`, `redirects`).
///
/// Implementations MUST be safe under concurrent `read`/`write`/`delete`
/// from the same task set; last-write-wins on a contended key is
/// acceptable, no additional locking is required beyond what the backend
/// itself provides.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Reads the bytes stored for `key`, or `None` if absent. No side
    /// effects.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes `value` for `key`, overwriting any existing entry.
    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Removes `key`. A no-op, not an error, if `key` is absent
    /// (idempotent).
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every key in `keys`, returning the count actually removed.
    /// Best-effort atomic, backend-dependent.
    async fn bulk_delete(&self, keys: &[String]) -> Result<usize> {
        let mut count = 0;
        for key in keys {
            if self.contains(key).await? {
                self.delete(key).await?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Whether `key` is currently present.
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).await?.is_some())
    }

    /// A snapshot (best-effort for eventually-consistent backends) of all
    /// keys currently stored.
    async fn keys(&self) -> Result<Vec<String>>;

    /// A snapshot of all values currently stored, logically paired with
    /// [`Storage::keys`] by backend-defined iteration order.
    async fn values(&self) -> Result<Vec<Vec<u8>>>;

    /// An approximate entry count.
    async fn size(&self) -> Result<usize> {
        Ok(self.keys().await?.len())
    }

    /// Removes every entry in this namespace.
    async fn clear(&self) -> Result<()>;

    /// Releases any underlying connection(s). A no-op for in-process
    /// backends.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// An in-process, concurrent-map-backed [`Storage`] implementation.
///
/// Backed by `dashmap`, used here as the always-available default the
/// way a concurrent-map manager serves as an in-memory option elsewhere
/// in the HTTP-caching ecosystem.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: dashmap::DashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    /// Creates an empty in-process backend.
    pub fn new() -> Self {
        Self { map: dashmap::DashMap::new() }
    }
}

#[async_trait]
impl Storage for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).map(|v| v.clone()))
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.map.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.map.contains_key(key))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.map.iter().map(|e| e.key().clone()).collect())
    }

    async fn values(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.map.iter().map(|e| e.value().clone()).collect())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.map.len())
    }

    async fn clear(&self) -> Result<()> {
        self.map.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idempotent_delete_on_absent_key() {
        let backend = MemoryBackend::new();
        backend.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn write_then_read_observes_new_value() {
        let backend = MemoryBackend::new();
        backend.write("k", b"v1".to_vec()).await.unwrap();
        assert_eq!(backend.read("k").await.unwrap(), Some(b"v1".to_vec()));
        backend.write("k", b"v2".to_vec()).await.unwrap();
        assert_eq!(backend.read("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn bulk_delete_counts_only_present_keys() {
        let backend = MemoryBackend::new();
        backend.write("a", b"1".to_vec()).await.unwrap();
        let removed = backend
            .bulk_delete(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn clear_empties_the_backend() {
        let backend = MemoryBackend::new();
        backend.write("a", b"1".to_vec()).await.unwrap();
        backend.clear().await.unwrap();
        assert_eq!(backend.size().await.unwrap(), 0);
    }
}
