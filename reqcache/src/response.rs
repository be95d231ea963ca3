//! The persistable snapshot of one HTTP exchange, and the multi-valued
//! header map it's built on.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// A case-insensitive, multi-valued header map.
///
/// Keeps every occurrence of a repeated header (e.g. multiple
/// `Set-Cookie` lines) rather than collapsing them, since header
/// fidelity is part of the round-trip contract for a stored response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderMap(HashMap<String, Vec<String>>);

impl HeaderMap {
    /// An empty header map.
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Replaces all values for `key` with a single value.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_ascii_lowercase(), vec![value.into()]);
    }

    /// Appends a value for `key`, preserving any existing ones.
    pub fn append(&mut self, key: &str, value: impl Into<String>) {
        self.0
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// The first value stored for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(&key.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values stored for `key`.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.0
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Removes every value stored for `key`.
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.0.remove(&key.to_ascii_lowercase())
    }

    /// Iterates over `(name, value)` pairs, one per stored value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }
}

impl From<&http::HeaderMap> for HeaderMap {
    fn from(headers: &http::HeaderMap) -> Self {
        let mut out = HeaderMap::new();
        for name in headers.keys() {
            for value in headers.get_all(name) {
                if let Ok(v) = value.to_str() {
                    out.append(name.as_str(), v.to_string());
                }
            }
        }
        out
    }
}

/// The HTTP protocol version of a cached exchange.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpVersion {
    /// HTTP/0.9
    #[serde(rename = "HTTP/0.9")]
    Http09,
    /// HTTP/1.0
    #[serde(rename = "HTTP/1.0")]
    Http10,
    /// HTTP/1.1
    #[serde(rename = "HTTP/1.1")]
    Http11,
    /// HTTP/2.0
    #[serde(rename = "HTTP/2.0")]
    H2,
    /// HTTP/3.0
    #[serde(rename = "HTTP/3.0")]
    H3,
}

impl TryFrom<http::Version> for HttpVersion {
    type Error = CacheError;

    fn try_from(value: http::Version) -> Result<Self> {
        Ok(match value {
            http::Version::HTTP_09 => Self::Http09,
            http::Version::HTTP_10 => Self::Http10,
            http::Version::HTTP_11 => Self::Http11,
            http::Version::HTTP_2 => Self::H2,
            http::Version::HTTP_3 => Self::H3,
            _ => Self::Http11,
        })
    }
}

/// A single cookie captured from `Set-Cookie`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
}

/// A parsed `Link` header entry (RFC 8288), keyed by its `rel` parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Link {
    /// The link target URL.
    pub url: String,
    /// Remaining link parameters (`rel` excluded, as it's the map key).
    pub params: HashMap<String, String>,
}

/// Minimal information about the request that produced a [`CachedResponse`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestInfo {
    /// Uppercased HTTP method.
    pub method: String,
    /// The request URL as sent (pre-normalization).
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body, if any.
    pub body: Option<Vec<u8>>,
}

/// A persistable snapshot of one HTTP exchange.
///
/// Serialized and stored under the `responses` namespace by
/// [`crate::facade::CacheBackend`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedResponse {
    /// Uppercased HTTP method of the original request.
    pub method: String,
    /// Normalized request URL.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// HTTP reason phrase.
    pub reason: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body bytes.
    pub body: Vec<u8>,
    /// Content-Encoding of the stored body, if the origin sent one.
    pub content_encoding: Option<String>,
    /// Cookies captured from `Set-Cookie`.
    pub cookies: Vec<Cookie>,
    /// The originating request's method/url/headers/body.
    pub request: RequestInfo,
    /// Seconds since the Unix epoch when this entry was written.
    pub created_at: u64,
    /// Seconds since the Unix epoch when this entry becomes stale, if ever.
    pub expires: Option<u64>,
    /// Chain of prior responses for a redirected request, oldest first.
    pub history: Vec<CachedResponse>,
    /// Parsed `Link` header entries, keyed by `rel`.
    pub links: HashMap<String, Link>,
    /// True if a transient error (e.g. deserialize failure) forced this
    /// snapshot to be treated as stale; never persisted as `true`.
    #[serde(skip, default)]
    pub read_error: bool,
}

impl CachedResponse {
    /// `now >= expires`, or a read/deserialize error was recorded for this
    /// instance. An expired entry must be treated as a miss by the
    /// caller, not handed back as fresh.
    pub fn is_expired(&self) -> bool {
        if self.read_error {
            return true;
        }
        match self.expires {
            Some(exp) => now_unix() >= exp,
            None => false,
        }
    }

    /// Always `true` once reconstituted from storage.
    pub fn from_cache(&self) -> bool {
        true
    }

    /// Body length in bytes.
    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    /// The media type portion of `Content-Type`, lowercased.
    pub fn content_type(&self) -> Option<String> {
        let raw = self.headers.get("content-type")?;
        Some(raw.split(';').next().unwrap_or(raw).trim().to_ascii_lowercase())
    }

    /// The `charset` parameter of `Content-Type`, if present.
    pub fn charset(&self) -> Option<String> {
        let raw = self.headers.get("content-type")?;
        raw.split(';').skip(1).find_map(|param| {
            let mut parts = param.splitn(2, '=');
            let key = parts.next()?.trim();
            if key.eq_ignore_ascii_case("charset") {
                Some(parts.next()?.trim().trim_matches('"').to_string())
            } else {
                None
            }
        })
    }

    /// Parses `Set-Cookie` response headers into [`Self::cookies`].
    pub fn parse_cookies(&mut self) {
        self.cookies.clear();
        for raw in self.headers.get_all("set-cookie") {
            if let Some(cookie) = parse_set_cookie(raw) {
                self.cookies.push(cookie);
            }
        }
    }

    /// Parses the `Link` response header (RFC 8288) into [`Self::links`].
    pub fn parse_links(&mut self) {
        self.links.clear();
        let Some(raw) = self.headers.get("link") else { return };
        for entry in split_link_header(raw) {
            let mut segments = entry.split(';').map(str::trim);
            let Some(url_segment) = segments.next() else { continue };
            let Some(url) = url_segment.strip_prefix('<').and_then(|s| s.strip_suffix('>'))
            else {
                continue;
            };
            let mut params = HashMap::new();
            let mut rel = None;
            for param in segments {
                let mut kv = param.splitn(2, '=');
                let Some(key) = kv.next() else { continue };
                let value = kv.next().unwrap_or("").trim_matches('"').to_string();
                if key.eq_ignore_ascii_case("rel") {
                    rel = Some(value);
                } else {
                    params.insert(key.trim().to_string(), value);
                }
            }
            if let Some(rel) = rel {
                self.links.insert(rel, Link { url: url.to_string(), params });
            }
        }
    }
}

/// Parses one `Set-Cookie` header value into its name/value pair, ignoring
/// the `Path`/`Domain`/`Expires`/etc. attributes that follow the first `;`.
fn parse_set_cookie(raw: &str) -> Option<Cookie> {
    let first = raw.split(';').next()?;
    let (name, value) = first.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(Cookie { name: name.to_string(), value: value.trim().to_string() })
}

/// Splits a `Link` header on commas that are not inside a quoted string.
fn split_link_header(raw: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in raw.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                entries.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        entries.push(current);
    }
    entries
}

/// Seconds since the Unix epoch, used for `created_at`/expiration math.
pub fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
