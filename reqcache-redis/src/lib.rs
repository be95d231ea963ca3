//! A `Storage` implementation backed by Redis.
//!
//! Namespacing follows the convention a cache-by-prefix scheme settles
//! on once multiple logical caches share one Redis instance: each key is
//! stored under `<cache_name>:<namespace>:<key>`, so `responses` and
//! `redirects` never collide and multiple `cache_name`s can share a
//! server. The driver owns its own connection pooling via
//! `redis::aio::ConnectionManager`, which reconnects transparently on
//! connection loss instead of surfacing it to every call site.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use reqcache::error::{CacheError, Result};
use reqcache::storage::Storage;

/// A Redis-backed [`Storage`] namespace.
pub struct RedisBackend {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisBackend {
    /// Connects to `redis_url` and scopes all keys under
    /// `<cache_name>:<namespace>:`.
    pub async fn new(redis_url: &str, cache_name: &str, namespace: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(Self { manager, prefix: format!("{cache_name}:{namespace}:") })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn strip_prefix<'a>(&self, full_key: &'a str) -> &'a str {
        full_key.strip_prefix(&self.prefix).unwrap_or(full_key)
    }

    async fn scan_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{}*", self.prefix);
        let keys: Vec<String> = conn
            .scan_match(pattern)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?
            .collect()
            .await;
        Ok(keys)
    }
}

#[async_trait]
impl Storage for RedisBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn
            .get(self.full_key(key))
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(value)
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(self.full_key(key), value)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(self.full_key(key))
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let keys = self.scan_keys().await?;
        Ok(keys.iter().map(|k| self.strip_prefix(k).to_string()).collect())
    }

    async fn values(&self) -> Result<Vec<Vec<u8>>> {
        let keys = self.scan_keys().await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let values: Vec<Option<Vec<u8>>> = conn
            .mget(&keys)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(values.into_iter().flatten().collect())
    }

    async fn clear(&self) -> Result<()> {
        let keys = self.scan_keys().await?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(keys).await.map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Requires a Redis instance at `REDIS_URL` (default `redis://127.0.0.1/`).
    async fn backend() -> RedisBackend {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        RedisBackend::new(&url, "reqcache-test", "responses").await.unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn write_then_read_round_trips() {
        let backend = backend().await;
        backend.write("k1", b"hello".to_vec()).await.unwrap();
        assert_eq!(backend.read("k1").await.unwrap(), Some(b"hello".to_vec()));
        backend.delete("k1").await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn clear_removes_only_this_namespace() {
        let backend = backend().await;
        backend.write("k2", b"v".to_vec()).await.unwrap();
        backend.clear().await.unwrap();
        assert_eq!(backend.read("k2").await.unwrap(), None);
    }
}
