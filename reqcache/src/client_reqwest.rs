//! [`HttpClient`] adapter over `reqwest`, feature `client-reqwest`.

use async_trait::async_trait;

use crate::error::{CacheError, Result};
use crate::response::HeaderMap;
use crate::session::{HttpClient, OutgoingRequest, RawResponse};

/// Wraps a `reqwest::Client`, translating [`OutgoingRequest`]/[`RawResponse`]
/// at the boundary so the rest of the crate never depends on `reqwest`
/// types directly.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    /// Wraps an existing `reqwest::Client`.
    pub fn new(inner: reqwest::Client) -> Self {
        Self { inner }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn perform_request(&self, request: OutgoingRequest) -> Result<RawResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| CacheError::ClientError(e.to_string()))?;

        let mut builder = self.inner.request(method, request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CacheError::ClientError(e.to_string()))?;

        let status = response.status().as_u16();
        let reason = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string();
        let headers = HeaderMap::from(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| CacheError::ClientError(e.to_string()))?
            .to_vec();

        Ok(RawResponse { status, reason, headers, body })
    }
}
