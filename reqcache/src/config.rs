//! Typed configuration record for a cache backend, in place of a
//! duck-typed kwargs bag.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;

use crate::expiration::{ExpireAfter, UrlPatternTable};
use crate::response::CachedResponse;

/// A predicate over a freshly-fetched response; `true` means cacheable.
pub type FilterFn = Arc<dyn Fn(&CachedResponse) -> bool + Send + Sync>;

/// Configuration shared by a [`crate::facade::CacheBackend`] and the
/// [`crate::session::CachedSession`] wrapping it.
#[derive(Clone)]
pub struct CacheBackendConfig {
    /// Session default expiration, used when nothing more specific matches.
    pub expire_after: ExpireAfter,
    /// Per-URL overrides, first match wins.
    pub urls_expire_after: UrlPatternTable,
    /// Status codes eligible for caching. Defaults to `{200}`.
    pub allowed_codes: Vec<u16>,
    /// Methods eligible for caching. Defaults to `{GET, HEAD}`.
    pub allowed_methods: Vec<Method>,
    /// When true, request headers participate in key derivation.
    pub include_headers: bool,
    /// Query params / body fields / (if `include_headers`) header names
    /// excluded from key derivation.
    pub ignored_params: Vec<String>,
    /// Predicate that can veto caching a response beyond status/method.
    pub filter_fn: Option<FilterFn>,
    /// Enables Cache-Control/`Expires` interpretation.
    pub cache_control: bool,
    /// When set, responses are stored in the HMAC-signed envelope format.
    pub secret_key: Option<Vec<u8>>,
    /// Close the backend when the owning session is dropped.
    pub autoclose: bool,
    /// Escape hatch for backend-specific options that don't warrant a
    /// dedicated field.
    pub extra: HashMap<String, String>,
}

impl Default for CacheBackendConfig {
    fn default() -> Self {
        Self {
            expire_after: ExpireAfter::Never,
            urls_expire_after: UrlPatternTable::new(),
            allowed_codes: vec![200],
            allowed_methods: vec![Method::GET, Method::HEAD],
            include_headers: false,
            ignored_params: Vec::new(),
            filter_fn: None,
            cache_control: false,
            secret_key: None,
            autoclose: true,
            extra: HashMap::new(),
        }
    }
}

impl CacheBackendConfig {
    /// Case-insensitive membership test for `allowed_methods`.
    pub fn method_allowed(&self, method: &str) -> bool {
        self.allowed_methods.iter().any(|m| m.as_str().eq_ignore_ascii_case(method))
    }

    /// Membership test for `allowed_codes`.
    pub fn status_allowed(&self, status: u16) -> bool {
        self.allowed_codes.contains(&status)
    }
}
