//! `reqcache` adds a transparent, persistent cache layer in front of any
//! HTTP client.
//!
//! A [`session::CachedSession`] wraps a client implementing
//! [`session::HttpClient`] and a [`facade::CacheBackend`] over a pair of
//! [`storage::Storage`] instances (one for responses, one for redirect
//! chains). Requests are deduplicated by a normalized, hashed cache key
//! ([`key`]); responses are kept or discarded per a configurable
//! Cache-Control-aware expiration policy ([`expiration`]); and stored
//! bytes go through a serialization envelope ([`envelope`]) that can
//! optionally be HMAC-signed to detect tampering on read.
//!
//! Two storage backends ship with this crate behind feature flags:
//! [`managers::sqlite`] (`backend-sqlite`, default) and
//! [`managers::filesystem`] (`backend-filesystem`, default). An
//! always-available in-process [`storage::MemoryBackend`] needs no
//! feature flag. Additional backends (Redis, MongoDB, DynamoDB) are
//! published as separate crates implementing [`storage::Storage`].
//!
//! ```no_run
//! use reqcache::config::CacheBackendConfig;
//! use reqcache::facade::CacheBackend;
//! use reqcache::session::{CachedSession, HttpClient, OutgoingRequest, RawResponse};
//! use reqcache::storage::MemoryBackend;
//! use reqcache::error::Result;
//! use std::sync::Arc;
//!
//! struct Noop;
//!
//! #[async_trait::async_trait]
//! impl HttpClient for Noop {
//!     async fn perform_request(&self, _req: OutgoingRequest) -> Result<RawResponse> {
//!         Ok(RawResponse {
//!             status: 200,
//!             reason: "OK".into(),
//!             headers: Default::default(),
//!             body: b"hello".to_vec(),
//!         })
//!     }
//! }
//!
//! # async fn run() {
//! let backend = CacheBackend::new(
//!     Arc::new(MemoryBackend::new()),
//!     Arc::new(MemoryBackend::new()),
//!     CacheBackendConfig::default(),
//! );
//! let session = CachedSession::new(Noop, backend);
//! let url = url::Url::parse("https://example.com").unwrap();
//! let response = session.request("GET", url, Default::default(), None).await.unwrap();
//! println!("from_cache={}", response.from_cache);
//! # }
//! ```

pub mod config;
pub mod envelope;
pub mod error;
pub mod expiration;
pub mod facade;
pub mod key;
pub mod managers;
pub mod response;
pub mod session;
pub mod storage;

pub use config::CacheBackendConfig;
pub use error::{CacheError, Result};
pub use expiration::ExpireAfter;
pub use facade::CacheBackend;
pub use response::CachedResponse;
pub use session::{CachedSession, HttpClient, OutgoingRequest, RawResponse, SessionResponse};
pub use storage::{MemoryBackend, Storage};

#[cfg(feature = "client-reqwest")]
pub mod client_reqwest;
