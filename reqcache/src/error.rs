use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error taxonomy for the cache core.
///
/// Only configuration-time errors are meant to propagate out of
/// [`crate::session::CachedSession`] — everything else (backend failures,
/// integrity failures, deserialization failures) is caught and converted
/// to a miss inside [`crate::facade::CacheBackend`].
#[derive(Error, Debug)]
pub enum CacheError {
    /// The configured storage backend could not be reached.
    #[error("cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A signed envelope's HMAC tag did not match its contents.
    #[error("cache entry failed integrity check")]
    IntegrityError,

    /// Stored bytes could not be decoded back into a [`crate::response::CachedResponse`].
    #[error("cache entry could not be deserialized: {0}")]
    SerializationError(String),

    /// A backend-specific size limit was exceeded; the write was skipped.
    #[error("item exceeds backend size limit ({limit} bytes): {detail}")]
    OversizedItem {
        /// The backend's hard limit, in bytes.
        limit: usize,
        /// A short description of what was skipped.
        detail: String,
    },

    /// A `urls_expire_after` glob pattern was malformed.
    #[error("invalid URL pattern `{0}`")]
    InvalidPattern(String),

    /// The wrapped [`crate::session::HttpClient`] failed to perform a
    /// request. Unlike the backend-failure variants above, this one
    /// propagates out of [`crate::session::CachedSession::request`] —
    /// there is no cached fallback unless a prior response exists.
    #[error("http client error: {0}")]
    ClientError(String),

    /// Error constructing or parsing an HTTP value.
    #[error(transparent)]
    Http(#[from] http::Error),

    /// Error parsing a header value as UTF-8.
    #[error(transparent)]
    HeaderToStr(#[from] http::header::ToStrError),

    /// Error parsing a URL.
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
}

impl CacheError {
    /// True for the subset of errors that the request path treats as a
    /// miss rather than propagating,
    pub fn is_cache_miss(&self) -> bool {
        matches!(
            self,
            CacheError::BackendUnavailable(_)
                | CacheError::IntegrityError
                | CacheError::SerializationError(_)
        )
    }
}
