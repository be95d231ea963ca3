//! The two-namespace cache wrapper and its high-level operations.

use std::sync::Arc;

use url::Url;

use crate::config::CacheBackendConfig;
use crate::envelope;
use crate::expiration::ExpireAfter;
use crate::key::{create_key, KeyBody};
use crate::response::{now_unix, CachedResponse, HeaderMap, RequestInfo};
use crate::storage::Storage;

/// Wraps two [`Storage`] instances — `responses` and `redirects` — plus
/// the shared policy configuration.
#[derive(Clone)]
pub struct CacheBackend {
    responses: Arc<dyn Storage>,
    redirects: Arc<dyn Storage>,
    /// Shared, hot-swappable configuration; runtime mutation of
    /// `expire_after` and friends is modeled as an atomic cell over the
    /// whole record rather than per-field interior mutability.
    pub config: Arc<arc_swap::ArcSwap<CacheBackendConfig>>,
}

mod arc_swap {
    //! A minimal atomic cell, just enough to let a session's configuration
    //! be swapped without requiring `&mut` access from every caller.
    use std::sync::RwLock;

    pub struct ArcSwap<T> {
        inner: RwLock<std::sync::Arc<T>>,
    }

    impl<T> ArcSwap<T> {
        pub fn new(value: T) -> Self {
            Self { inner: RwLock::new(std::sync::Arc::new(value)) }
        }

        pub fn load(&self) -> std::sync::Arc<T> {
            self.inner.read().expect("lock poisoned").clone()
        }

        pub fn store(&self, value: T) {
            *self.inner.write().expect("lock poisoned") = std::sync::Arc::new(value);
        }
    }
}

impl CacheBackend {
    /// Builds a facade over the given response/redirect stores.
    pub fn new(
        responses: Arc<dyn Storage>,
        redirects: Arc<dyn Storage>,
        config: CacheBackendConfig,
    ) -> Self {
        Self { responses, redirects, config: Arc::new(arc_swap::ArcSwap::new(config)) }
    }

    /// Replaces the shared configuration; in-flight requests observe the
    /// new value on their next read.
    pub fn set_config(&self, config: CacheBackendConfig) {
        self.config.store(config);
    }

    fn current_config(&self) -> Arc<CacheBackendConfig> {
        self.config.load()
    }

    /// Derives a cache key the way this backend's configuration demands.
    pub fn create_key(
        &self,
        method: &str,
        url: &Url,
        body: Option<KeyBody<'_>>,
        headers: Option<&crate::response::HeaderMap>,
    ) -> String {
        let config = self.current_config();
        create_key(method, url, body, headers, &config.ignored_params, config.include_headers)
    }

    /// Resolves a redirect entry if present, then reads and deserializes
    /// the target response. Misses (absent key, integrity failure,
    /// deserialization failure) all surface as `None`, never an error.
    pub async fn get_response(&self, key: &str) -> Option<CachedResponse> {
        let target_key = match self.redirects.read(key).await {
            Ok(Some(bytes)) => String::from_utf8(bytes).ok().unwrap_or_else(|| key.to_string()),
            _ => key.to_string(),
        };

        let bytes = self.responses.read(&target_key).await.ok().flatten()?;
        let config = self.current_config();
        let decoded = match &config.secret_key {
            Some(secret) => envelope::deserialize_signed(&bytes, secret),
            None => envelope::deserialize_plain(&bytes),
        };
        match decoded {
            Ok(response) => Some(response),
            Err(_) => None,
        }
    }

    /// Serializes and writes `response` under `key`, and writes a redirect
    /// entry for each element of its history pointing at `key`.
    pub async fn save_response(&self, key: &str, response: &CachedResponse) -> bool {
        let config = self.current_config();
        let bytes = match &config.secret_key {
            Some(secret) => envelope::serialize_signed(response, secret),
            None => envelope::serialize_plain(response),
        };
        let Ok(bytes) = bytes else { return false };
        if self.responses.write(key, bytes).await.is_err() {
            return false;
        }
        for hop in &response.history {
            let hop_key = self.create_key(&hop.method, &parse_url(&hop.url), None, None);
            let _ = self.redirects.write(&hop_key, key.as_bytes().to_vec()).await;
        }
        true
    }

    /// Removes `key`'s response and any redirect entry pointing at it.
    pub async fn delete(&self, key: &str) {
        let _ = self.responses.delete(key).await;
        if let Ok(redirect_keys) = self.redirects.keys().await {
            for rk in redirect_keys {
                if let Ok(Some(target)) = self.redirects.read(&rk).await {
                    if target == key.as_bytes() {
                        let _ = self.redirects.delete(&rk).await;
                    }
                }
            }
        }
    }

    /// Removes every key in `keys`.
    pub async fn bulk_delete(&self, keys: &[String]) -> usize {
        let mut removed = 0;
        for key in keys {
            if self.responses.contains(key).await.unwrap_or(false) {
                self.delete(key).await;
                removed += 1;
            }
        }
        removed
    }

    /// Derives the key for `(method, url)` and deletes it.
    pub async fn delete_url(&self, method: &str, url: &Url) {
        let key = self.create_key(method, url, None, None);
        self.delete(&key).await;
    }

    /// Iterates over all cached responses and removes expired ones.
    /// When `new_expire_after` is given, surviving entries are
    /// re-stamped with that expiration instead of their original one.
    pub async fn delete_expired_responses(&self, new_expire_after: Option<ExpireAfter>) -> usize {
        let Ok(keys) = self.responses.keys().await else { return 0 };
        let mut removed = 0;
        for key in keys {
            let mut response = match self.get_response(&key).await {
                Some(response) => response,
                // The store's own key listing just produced this key, so a
                // miss here means the entry exists but couldn't be read
                // back (a transient storage error or corrupt payload), not
                // a genuine absence. Record it as a read error so it's
                // swept up below instead of silently skipped.
                None if self.responses.contains(&key).await.unwrap_or(false) => {
                    unreadable_response_stub(&key)
                }
                None => continue,
            };
            if response.is_expired() {
                self.delete(&key).await;
                removed += 1;
                continue;
            }
            if let Some(expire) = new_expire_after {
                response.expires = expire.resolve(now_unix());
                self.save_response(&key, &response).await;
            }
        }
        removed
    }

    /// All URLs currently cached.
    pub async fn get_urls(&self) -> Vec<String> {
        let Ok(values) = self.responses.values().await else { return Vec::new() };
        let config = self.current_config();
        values
            .into_iter()
            .filter_map(|bytes| match &config.secret_key {
                Some(secret) => envelope::deserialize_signed(&bytes, secret).ok(),
                None => envelope::deserialize_plain(&bytes).ok(),
            })
            .map(|r| r.url)
            .collect()
    }

    /// Whether `(method, url)` is currently cached (ignoring expiration).
    pub async fn has_url(&self, method: &str, url: &Url) -> bool {
        let key = self.create_key(method, url, None, None);
        self.responses.contains(&key).await.unwrap_or(false)
    }

    /// Clears both namespaces.
    pub async fn clear(&self) {
        let _ = self.responses.clear().await;
        let _ = self.redirects.clear().await;
    }

    /// `true` iff method, status, `filter_fn`, Cache-Control response
    /// policy, and resolved `ExpireAfter` all permit storing `response`.
    /// A `filter_fn` returning `false` always vetoes the write regardless
    /// of other factors.
    pub fn is_cacheable(&self, response: &CachedResponse, resolved: Option<ExpireAfter>) -> bool {
        let config = self.current_config();
        if !config.method_allowed(&response.method) {
            return false;
        }
        if !config.status_allowed(response.status) {
            return false;
        }
        if let Some(filter) = &config.filter_fn {
            if !filter(response) {
                return false;
            }
        }
        match resolved {
            None => false,             // response Cache-Control: no-store
            Some(e) if e.skips_write() => false,
            Some(_) => true,
        }
    }
}

/// A placeholder for an entry `get_response` couldn't read back, carrying
/// no real data but `read_error: true` so `is_expired()` treats it as stale.
fn unreadable_response_stub(key: &str) -> CachedResponse {
    CachedResponse {
        method: String::new(),
        url: key.to_string(),
        status: 0,
        reason: String::new(),
        headers: HeaderMap::new(),
        body: Vec::new(),
        content_encoding: None,
        cookies: Vec::new(),
        request: RequestInfo {
            method: String::new(),
            url: key.to_string(),
            headers: HeaderMap::new(),
            body: None,
        },
        created_at: now_unix(),
        expires: None,
        history: Vec::new(),
        links: Default::default(),
        read_error: true,
    }
}

fn parse_url(raw: &str) -> Url {
    Url::parse(raw).unwrap_or_else(|_| Url::parse("http://invalid.invalid/").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{HeaderMap, RequestInfo};
    use crate::storage::MemoryBackend;
    use std::collections::HashMap;

    fn backend() -> CacheBackend {
        CacheBackend::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
            CacheBackendConfig::default(),
        )
    }

    fn response(url: &str, status: u16) -> CachedResponse {
        CachedResponse {
            method: "GET".into(),
            url: url.into(),
            status,
            reason: "OK".into(),
            headers: HeaderMap::new(),
            body: b"hello".to_vec(),
            content_encoding: None,
            cookies: vec![],
            request: RequestInfo {
                method: "GET".into(),
                url: url.into(),
                headers: HeaderMap::new(),
                body: None,
            },
            created_at: now_unix(),
            expires: None,
            history: vec![],
            links: HashMap::new(),
            read_error: false,
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let backend = backend();
        let url = Url::parse("http://x/a").unwrap();
        let key = backend.create_key("GET", &url, None, None);
        let r = response("http://x/a", 200);
        assert!(backend.save_response(&key, &r).await);
        let got = backend.get_response(&key).await.unwrap();
        assert_eq!(got.url, r.url);
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_absent_key() {
        let backend = backend();
        backend.delete("nonexistent").await;
    }

    #[tokio::test]
    async fn redirect_chain_resolves_to_final_target() {
        let backend = backend();
        let final_url = Url::parse("http://x/b").unwrap();
        let final_key = backend.create_key("GET", &final_url, None, None);

        let mut final_response = response("http://x/b", 200);
        let hop = response("http://x/a", 302);
        final_response.history = vec![hop];

        backend.save_response(&final_key, &final_response).await;

        let hop_key = backend.create_key("GET", &Url::parse("http://x/a").unwrap(), None, None);
        let resolved = backend.get_response(&hop_key).await.unwrap();
        assert_eq!(resolved.url, "http://x/b");
    }

    #[tokio::test]
    async fn clear_empties_both_namespaces() {
        let backend = backend();
        let url = Url::parse("http://x/a").unwrap();
        let key = backend.create_key("GET", &url, None, None);
        backend.save_response(&key, &response("http://x/a", 200)).await;
        backend.clear().await;
        assert!(backend.get_response(&key).await.is_none());
    }

    #[test]
    fn is_cacheable_respects_allowed_status() {
        let backend = backend();
        let r = response("http://x/a", 404);
        assert!(!backend.is_cacheable(&r, Some(ExpireAfter::Never)));
    }

    #[test]
    fn is_cacheable_false_on_immediate_expire() {
        let backend = backend();
        let r = response("http://x/a", 200);
        assert!(!backend.is_cacheable(&r, Some(ExpireAfter::Immediate)));
    }

    /// A `Storage` whose `keys`/`contains` report a key present (as a real
    /// backend's own listing would) but whose `read` always comes back
    /// empty, simulating a transient read failure on an otherwise-known key.
    struct UnreadableEntryBackend {
        key: String,
    }

    #[async_trait::async_trait]
    impl Storage for UnreadableEntryBackend {
        async fn read(&self, _key: &str) -> crate::error::Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn write(&self, _key: &str, _value: Vec<u8>) -> crate::error::Result<()> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> crate::error::Result<()> {
            Ok(())
        }
        async fn contains(&self, _key: &str) -> crate::error::Result<bool> {
            Ok(true)
        }
        async fn keys(&self) -> crate::error::Result<Vec<String>> {
            Ok(vec![self.key.clone()])
        }
        async fn values(&self) -> crate::error::Result<Vec<Vec<u8>>> {
            Ok(Vec::new())
        }
        async fn clear(&self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unreadable_entry_is_swept_up_as_a_read_error() {
        let backend = CacheBackend::new(
            Arc::new(UnreadableEntryBackend { key: "stuck".to_string() }),
            Arc::new(MemoryBackend::new()),
            CacheBackendConfig::default(),
        );
        let removed = backend.delete_expired_responses(None).await;
        assert_eq!(removed, 1);
    }

    #[test]
    fn filter_fn_veto_wins_even_if_otherwise_cacheable() {
        let mut config = CacheBackendConfig::default();
        config.filter_fn = Some(Arc::new(|_r| false));
        let backend = CacheBackend::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
            config,
        );
        let r = response("http://x/a", 200);
        assert!(!backend.is_cacheable(&r, Some(ExpireAfter::Never)));
    }
}
