//! The request interception state machine and the abstract
//! HTTP client collaborator it wraps.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use url::Url;

use crate::config::CacheBackendConfig;
use crate::error::Result;
use crate::expiration::{
    resolve_read_write_policy, resolve_request_expire_after, resolve_response_expiration,
    CacheControlDirectives, ExpirationRequestContext,
};
use crate::facade::CacheBackend;
use crate::key::KeyBody;
use crate::response::{now_unix, CachedResponse, Cookie, HeaderMap, RequestInfo};

/// An outbound request handed to the wrapped [`HttpClient`].
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    /// Uppercased HTTP method.
    pub method: String,
    /// Target URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body, if any.
    pub body: Option<Vec<u8>>,
}

/// A raw response as returned by the wrapped [`HttpClient`], before it's
/// folded into a [`CachedResponse`].
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// HTTP reason phrase.
    pub reason: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body bytes.
    pub body: Vec<u8>,
}

/// The external HTTP client collaborator. `CachedSession` itself also
/// implements this trait, so sessions compose by wrapping one another —
/// the same mixin pattern a retry or auth layer would use to stack on top
/// of a base client.
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    /// The single overridable hook other aspects (auth, retries,
    /// rate-limiting) can wrap.
    async fn perform_request(&self, request: OutgoingRequest) -> Result<RawResponse>;
}

/// The outcome of [`CachedSession::request`]: a response plus whether it
/// was served from cache.
#[derive(Debug, Clone)]
pub struct SessionResponse {
    /// The response, either reconstituted from cache or freshly fetched.
    pub response: CachedResponse,
    /// `true` if this response came from the cache without a network call.
    pub from_cache: bool,
}

/// A scoped guard returned by [`CachedSession::disabled`]: while held, the
/// session bypasses the cache entirely; dropping it
/// restores the prior nesting depth.
pub struct DisabledGuard<'a> {
    counter: &'a AtomicU32,
}

impl Drop for DisabledGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wraps an [`HttpClient`] with a [`CacheBackend`], implementing the
/// read-check-fetch-store request pipeline.
pub struct CachedSession<C> {
    client: C,
    backend: CacheBackend,
    disabled_depth: AtomicU32,
    jar: Mutex<Vec<Cookie>>,
}

impl<C: HttpClient> CachedSession<C> {
    /// Wraps `client` with caching governed by `backend`.
    pub fn new(client: C, backend: CacheBackend) -> Self {
        Self { client, backend, disabled_depth: AtomicU32::new(0), jar: Mutex::new(Vec::new()) }
    }

    /// A snapshot of the cookies accumulated from every response (and
    /// redirect hop) served by this session so far.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.jar.lock().unwrap().clone()
    }

    /// Merges a response's own cookies and its redirect history's cookies
    /// into the session jar, oldest hop first, a later value for the same
    /// name overwriting an earlier one.
    fn update_jar(&self, response: &CachedResponse) {
        let mut jar = self.jar.lock().unwrap();
        for hop in &response.history {
            merge_cookies(&mut jar, &hop.cookies);
        }
        merge_cookies(&mut jar, &response.cookies);
    }

    /// Scopes a region of code where the cache is fully bypassed. Nestable;
    /// the cache stays disabled until every guard in the nest is dropped.
    pub fn disabled(&self) -> DisabledGuard<'_> {
        self.disabled_depth.fetch_add(1, Ordering::SeqCst);
        DisabledGuard { counter: &self.disabled_depth }
    }

    fn is_disabled(&self) -> bool {
        self.disabled_depth.load(Ordering::SeqCst) > 0
    }

    /// Removes every expired entry from the wrapped backend.
    pub async fn delete_expired_responses(&self) -> usize {
        self.backend.delete_expired_responses(None).await
    }

    /// Runs the full cache-then-fetch pipeline for one request.
    pub async fn request(
        &self,
        method: &str,
        url: Url,
        headers: HeaderMap,
        body: Option<Vec<u8>>,
    ) -> Result<SessionResponse> {
        let method = method.to_ascii_uppercase();

        // CheckDisabled
        if self.is_disabled() {
            return self.fetch_and_postprocess(method, url, headers, body, None, false).await;
        }

        let config = self.backend.config.load();
        let base_url = base_url_for_patterns(&url);
        let request_cache_control = headers.get("cache-control").map(str::to_string);
        let only_if_cached = config.cache_control
            && request_cache_control
                .as_deref()
                .map(|raw| CacheControlDirectives::parse(raw).only_if_cached)
                .unwrap_or(false);

        let read_write = resolve_read_write_policy(&ExpirationRequestContext {
            cache_control_enabled: config.cache_control,
            request_cache_control: request_cache_control.as_deref(),
            per_request_expire_after: None,
            base_url: &base_url,
            url_patterns: Some(&config.urls_expire_after),
            session_default: config.expire_after,
        });

        // DeriveKey
        let key_body = body.as_deref().map(KeyBody::Raw);
        let key = self.backend.create_key(&method, &url, key_body, Some(&headers));

        if !read_write.can_read {
            return self
                .fetch_and_postprocess(method, url, headers, body, None, read_write.can_write)
                .await;
        }

        // Lookup
        let cached = self.backend.get_response(&key).await;
        match cached {
            Some(cached) if !cached.is_expired() => {
                self.update_jar(&cached);
                Ok(SessionResponse { response: cached, from_cache: true })
            }
            Some(_) if only_if_cached => Ok(SessionResponse {
                response: synthesize_unsatisfiable(&method, &url, &headers, &body),
                from_cache: false,
            }),
            None if only_if_cached => Ok(SessionResponse {
                response: synthesize_unsatisfiable(&method, &url, &headers, &body),
                from_cache: false,
            }),
            Some(stale) => {
                // ConditionalOrFetch: attach validators, then fetch.
                let mut conditional_headers = headers.clone();
                if let Some(etag) = stale.headers.get("etag") {
                    conditional_headers.insert("if-none-match", etag.to_string());
                }
                if let Some(last_modified) = stale.headers.get("last-modified") {
                    conditional_headers.insert("if-modified-since", last_modified.to_string());
                }
                self.fetch_and_postprocess(
                    method,
                    url,
                    conditional_headers,
                    body,
                    Some(stale),
                    read_write.can_write,
                )
                .await
            }
            None => {
                self.fetch_and_postprocess(method, url, headers, body, None, read_write.can_write)
                    .await
            }
        }
    }

    async fn fetch_and_postprocess(
        &self,
        method: String,
        url: Url,
        headers: HeaderMap,
        body: Option<Vec<u8>>,
        prev: Option<CachedResponse>,
        can_write: bool,
    ) -> Result<SessionResponse> {
        let http_headers = headers.clone();
        let outgoing = OutgoingRequest {
            method: method.clone(),
            url: url.clone(),
            headers: http_headers,
            body: body.clone(),
        };

        let fetch_result = self.client.perform_request(outgoing).await;

        let raw = match fetch_result {
            Ok(raw) => raw,
            Err(err) => {
                // Network error: fall back to a stale cached entry if one exists.
                if let Some(prev) = prev {
                    self.update_jar(&prev);
                    return Ok(SessionResponse { response: prev, from_cache: true });
                }
                return Err(err);
            }
        };

        // 304 Not Modified: refresh prev's expiration, write back, return prev.
        if raw.status == 304 {
            if let Some(mut prev) = prev {
                let config = self.backend.config.load();
                let resolved = self.resolve_expiration(&url, &headers, &raw.headers, &config);
                prev.expires = resolved.and_then(|e| e.resolve(now_unix()));
                let key = self.backend.create_key(
                    &method,
                    &url,
                    body.as_deref().map(KeyBody::Raw),
                    Some(&headers),
                );
                if can_write {
                    self.backend.save_response(&key, &prev).await;
                }
                self.update_jar(&prev);
                return Ok(SessionResponse { response: prev, from_cache: true });
            }
        }

        let mut response = CachedResponse {
            method: method.clone(),
            url: url.to_string(),
            status: raw.status,
            reason: raw.reason,
            headers: raw.headers.clone(),
            body: raw.body,
            content_encoding: raw.headers.get("content-encoding").map(str::to_string),
            cookies: Vec::new(),
            request: RequestInfo {
                method: method.clone(),
                url: url.to_string(),
                headers: headers.clone(),
                body: body.clone(),
            },
            created_at: now_unix(),
            expires: None,
            history: Vec::new(),
            links: Default::default(),
            read_error: false,
        };
        response.parse_links();
        response.parse_cookies();

        if can_write {
            let config = self.backend.config.load();
            let resolved = self.resolve_expiration(&url, &headers, &response.headers, &config);
            if self.backend.is_cacheable(&response, resolved) {
                response.expires = resolved.and_then(|e| e.resolve(now_unix()));
                let key = self.backend.create_key(
                    &method,
                    &url,
                    body.as_deref().map(KeyBody::Raw),
                    Some(&headers),
                );
                self.backend.save_response(&key, &response).await;
            }
        }

        self.update_jar(&response);
        Ok(SessionResponse { response, from_cache: false })
    }

    fn resolve_expiration(
        &self,
        url: &Url,
        request_headers: &HeaderMap,
        response_headers: &HeaderMap,
        config: &CacheBackendConfig,
    ) -> Option<crate::expiration::ExpireAfter> {
        let base_url = base_url_for_patterns(url);
        let request_cache_control = request_headers.get("cache-control");
        let fallback = resolve_request_expire_after(&ExpirationRequestContext {
            cache_control_enabled: config.cache_control,
            request_cache_control,
            per_request_expire_after: None,
            base_url: &base_url,
            url_patterns: Some(&config.urls_expire_after),
            session_default: config.expire_after,
        });
        resolve_response_expiration(
            config.cache_control,
            response_headers.get("cache-control"),
            response_headers.get("expires"),
            fallback,
        )
    }
}

#[async_trait::async_trait]
impl<C: HttpClient> HttpClient for CachedSession<C> {
    async fn perform_request(&self, request: OutgoingRequest) -> Result<RawResponse> {
        let response = self
            .request(&request.method, request.url, request.headers, request.body)
            .await?;
        Ok(RawResponse {
            status: response.response.status,
            reason: response.response.reason,
            headers: response.response.headers,
            body: response.response.body,
        })
    }
}

/// Inserts/overwrites cookies in `jar` by name, preserving `jar`'s existing
/// order for names already present.
fn merge_cookies(jar: &mut Vec<Cookie>, new: &[Cookie]) {
    for cookie in new {
        if let Some(existing) = jar.iter_mut().find(|c| c.name == cookie.name) {
            existing.value = cookie.value.clone();
        } else {
            jar.push(cookie.clone());
        }
    }
}

fn base_url_for_patterns(url: &Url) -> String {
    format!("{}{}", url.host_str().unwrap_or(""), url.path())
}

/// Synthesizes a `504`-equivalent response for an `only-if-cached` request
/// that has no usable entry to serve, without ever contacting the network.
fn synthesize_unsatisfiable(
    method: &str,
    url: &Url,
    headers: &HeaderMap,
    body: &Option<Vec<u8>>,
) -> CachedResponse {
    CachedResponse {
        method: method.to_string(),
        url: url.to_string(),
        status: 504,
        reason: "Not Cached".to_string(),
        headers: HeaderMap::new(),
        body: Vec::new(),
        content_encoding: None,
        cookies: Vec::new(),
        request: RequestInfo {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.clone(),
            body: body.clone(),
        },
        created_at: now_unix(),
        expires: None,
        history: Vec::new(),
        links: Default::default(),
        read_error: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheBackendConfig;
    use crate::storage::MemoryBackend;
    use std::sync::{Arc, Mutex};

    struct CountingClient {
        hits: Mutex<u32>,
        body: &'static [u8],
        status: u16,
        extra_headers: HeaderMap,
    }

    impl CountingClient {
        fn new(body: &'static [u8]) -> Self {
            Self { hits: Mutex::new(0), body, status: 200, extra_headers: HeaderMap::new() }
        }
    }

    #[async_trait::async_trait]
    impl HttpClient for CountingClient {
        async fn perform_request(&self, _req: OutgoingRequest) -> Result<RawResponse> {
            *self.hits.lock().unwrap() += 1;
            Ok(RawResponse {
                status: self.status,
                reason: "OK".into(),
                headers: self.extra_headers.clone(),
                body: self.body.to_vec(),
            })
        }
    }

    fn backend() -> CacheBackend {
        CacheBackend::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
            CacheBackendConfig::default(),
        )
    }

    #[tokio::test]
    async fn second_identical_get_is_served_from_cache() {
        let client = CountingClient::new(b"hello");
        let session = CachedSession::new(client, backend());
        let url = Url::parse("http://x/a").unwrap();

        let first = session.request("GET", url.clone(), HeaderMap::new(), None).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.response.body, b"hello");

        let second = session.request("GET", url, HeaderMap::new(), None).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(*session.client.hits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn disabled_guard_bypasses_cache_for_its_scope() {
        let client = CountingClient::new(b"hello");
        let session = CachedSession::new(client, backend());
        let url = Url::parse("http://x/a").unwrap();

        {
            let _guard = session.disabled();
            session.request("GET", url.clone(), HeaderMap::new(), None).await.unwrap();
            session.request("GET", url.clone(), HeaderMap::new(), None).await.unwrap();
        }
        assert_eq!(*session.client.hits.lock().unwrap(), 2);

        session.request("GET", url, HeaderMap::new(), None).await.unwrap();
        assert_eq!(*session.client.hits.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn only_if_cached_miss_synthesizes_504_without_contacting_client() {
        let client = CountingClient::new(b"hello");
        let mut config = CacheBackendConfig::default();
        config.cache_control = true;
        let store = CacheBackend::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
            config,
        );
        let session = CachedSession::new(client, store);

        let mut headers = HeaderMap::new();
        headers.insert("cache-control", "only-if-cached");
        let result = session
            .request("GET", Url::parse("http://x/never-fetched").unwrap(), headers, None)
            .await
            .unwrap();

        assert_eq!(result.response.status, 504);
        assert!(!result.from_cache);
        assert_eq!(*session.client.hits.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn only_if_cached_with_an_expired_entry_also_synthesizes_504() {
        let client = CountingClient::new(b"hello");
        let mut config = CacheBackendConfig::default();
        config.cache_control = true;
        let store = CacheBackend::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
            config,
        );
        let url = Url::parse("http://x/stale").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("cache-control", "only-if-cached");

        let key = store.create_key("GET", &url, None, Some(&headers));
        let stale = CachedResponse {
            method: "GET".to_string(),
            url: url.to_string(),
            status: 200,
            reason: "OK".to_string(),
            headers: HeaderMap::new(),
            body: b"old".to_vec(),
            content_encoding: None,
            cookies: Vec::new(),
            request: RequestInfo {
                method: "GET".to_string(),
                url: url.to_string(),
                headers: HeaderMap::new(),
                body: None,
            },
            created_at: now_unix(),
            expires: Some(now_unix() - 1),
            history: Vec::new(),
            links: Default::default(),
            read_error: false,
        };
        store.save_response(&key, &stale).await;

        let session = CachedSession::new(client, store);
        let result = session.request("GET", url, headers, None).await.unwrap();

        assert_eq!(result.response.status, 504);
        assert!(!result.from_cache);
        assert_eq!(*session.client.hits.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn set_cookie_response_headers_land_in_the_session_jar() {
        let mut client = CountingClient::new(b"hello");
        client.extra_headers.append("set-cookie", "session=abc123; Path=/");
        let session = CachedSession::new(client, backend());

        session
            .request("GET", Url::parse("http://x/login").unwrap(), HeaderMap::new(), None)
            .await
            .unwrap();

        let jar = session.cookies();
        assert_eq!(jar, vec![Cookie { name: "session".to_string(), value: "abc123".to_string() }]);
    }

    #[tokio::test]
    async fn ignored_param_makes_second_request_a_hit() {
        let client = CountingClient::new(b"hello");
        let mut config = CacheBackendConfig::default();
        config.ignored_params = vec!["token".to_string()];
        let store = CacheBackend::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
            config,
        );
        let session = CachedSession::new(client, store);

        session
            .request("GET", Url::parse("http://x/?token=A").unwrap(), HeaderMap::new(), None)
            .await
            .unwrap();
        let second = session
            .request("GET", Url::parse("http://x/?token=B").unwrap(), HeaderMap::new(), None)
            .await
            .unwrap();
        assert!(second.from_cache);
    }
}
