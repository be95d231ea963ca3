//! SQLite-backed [`Storage`], feature `backend-sqlite`.
//!
//! Grounded on the community SQLite cache manager pattern (a single
//! database file, one connection behind a mutex, WAL + relaxed
//! `synchronous` for a cache that can tolerate crash data loss).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CacheError, Result};
use crate::storage::Storage;

/// A single-file SQLite [`Storage`] backend.
///
/// `cache_name` is the database file path; `~` is expanded to the user's
/// home directory. One connection guarded by a mutex is held per
/// instance — `init_db` runs once at construction, so no caller ever
/// re-enters the lock while holding it.
pub struct SqliteBackend {
    connection: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish()
    }
}

impl SqliteBackend {
    /// Opens (creating if absent) the SQLite file at `cache_name`.
    ///
    /// `fast_save` relaxes `synchronous` to `OFF` for maximum write
    /// throughput at the cost of durability across a hard crash — an
    /// acceptable tradeoff for a cache.
    pub fn new(cache_name: impl AsRef<Path>, fast_save: bool) -> Result<Self> {
        let path = expand_home(cache_name.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        }
        let connection = Connection::open(&path)
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;

        connection
            .pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        connection
            .pragma_update(None, "synchronous", if fast_save { "OFF" } else { "NORMAL" })
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        connection
            .busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;

        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS entries (key TEXT PRIMARY KEY, value BLOB NOT NULL)",
                [],
            )
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;

        log::debug!("opened sqlite cache at {}", path.display());
        Ok(Self { connection: Mutex::new(connection) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|e| CacheError::BackendUnavailable(format!("mutex poisoned: {e}")))
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(raw) = path.to_str().ok_or(()) else { return path.to_path_buf() };
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

#[async_trait]
impl Storage for SqliteBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        conn.query_row("SELECT value FROM entries WHERE key = ?1", params![key], |row| {
            row.get::<_, Vec<u8>>(0)
        })
        .optional()
        .map_err(|e| CacheError::BackendUnavailable(e.to_string()))
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO entries (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM entries WHERE key = ?1", params![key])
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT key FROM entries")
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))
    }

    async fn values(&self) -> Result<Vec<Vec<u8>>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT value FROM entries")
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM entries", [])
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("cache.sqlite"), true).unwrap();
        backend.write("k", b"v".to_vec()).await.unwrap();
        assert_eq!(backend.read("k").await.unwrap(), Some(b"v".to_vec()));
        backend.delete("k").await.unwrap();
        assert_eq!(backend.read("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn overwrite_on_conflicting_key() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("cache.sqlite"), false).unwrap();
        backend.write("k", b"v1".to_vec()).await.unwrap();
        backend.write("k", b"v2".to_vec()).await.unwrap();
        assert_eq!(backend.read("k").await.unwrap(), Some(b"v2".to_vec()));
    }
}
