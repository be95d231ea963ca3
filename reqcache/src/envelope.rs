//! Converts a [`CachedResponse`] to and from storage bytes.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{CacheError, Result};
use crate::response::CachedResponse;

type HmacSha256 = Hmac<Sha256>;

/// Serializes `response` with `postcard` (a compact, stable binary format)
/// for direct storage — no signing.
pub fn serialize_plain(response: &CachedResponse) -> Result<Vec<u8>> {
    postcard::to_allocvec(response)
        .map_err(|e| CacheError::SerializationError(e.to_string()))
}

/// Deserializes bytes previously produced by [`serialize_plain`].
/// `postcard` tolerates trailing/missing optional fields across minor
/// schema changes, so fields added later with `#[serde(default)]` stay
/// forward-compatible with older stored bytes.
pub fn deserialize_plain(bytes: &[u8]) -> Result<CachedResponse> {
    postcard::from_bytes(bytes).map_err(|e| CacheError::SerializationError(e.to_string()))
}

/// Wraps [`serialize_plain`]'s output in an envelope carrying an
/// HMAC-SHA256 tag over the plain bytes, keyed by `secret`.
///
/// Layout: `[32-byte tag][plain bytes]`. The tag only guards against
/// tampering; unlike formats that can execute code on deserialization,
/// `postcard` decoding is pure data, so there's nothing for a forged
/// payload to exploit even before the tag is checked.
pub fn serialize_signed(response: &CachedResponse, secret: &[u8]) -> Result<Vec<u8>> {
    let plain = serialize_plain(response)?;
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| CacheError::SerializationError(e.to_string()))?;
    mac.update(&plain);
    let tag = mac.finalize().into_bytes();

    let mut out = Vec::with_capacity(tag.len() + plain.len());
    out.extend_from_slice(&tag);
    out.extend_from_slice(&plain);
    Ok(out)
}

/// Verifies and decodes bytes produced by [`serialize_signed`]. Returns
/// [`CacheError::IntegrityError`] on any tag mismatch (including corrupt
/// or truncated envelopes) — the caller must treat this as a cache miss,
/// never a crash.
pub fn deserialize_signed(bytes: &[u8], secret: &[u8]) -> Result<CachedResponse> {
    const TAG_LEN: usize = 32;
    if bytes.len() < TAG_LEN {
        return Err(CacheError::IntegrityError);
    }
    let (tag, plain) = bytes.split_at(TAG_LEN);

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| CacheError::IntegrityError)?;
    mac.update(plain);
    mac.verify_slice(tag).map_err(|_| CacheError::IntegrityError)?;

    deserialize_plain(plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{HeaderMap, RequestInfo};
    use std::collections::HashMap;

    fn sample() -> CachedResponse {
        CachedResponse {
            method: "GET".into(),
            url: "https://x/a".into(),
            status: 200,
            reason: "OK".into(),
            headers: HeaderMap::new(),
            body: b"hello".to_vec(),
            content_encoding: None,
            cookies: vec![],
            request: RequestInfo {
                method: "GET".into(),
                url: "https://x/a".into(),
                headers: HeaderMap::new(),
                body: None,
            },
            created_at: 1000,
            expires: Some(2000),
            history: vec![],
            links: HashMap::new(),
            read_error: false,
        }
    }

    #[test]
    fn plain_round_trip() {
        let r = sample();
        let bytes = serialize_plain(&r).unwrap();
        let back = deserialize_plain(&bytes).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn signed_round_trip_with_matching_key() {
        let r = sample();
        let bytes = serialize_signed(&r, b"secret1").unwrap();
        let back = deserialize_signed(&bytes, b"secret1").unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn signed_round_trip_fails_with_wrong_key() {
        let r = sample();
        let bytes = serialize_signed(&r, b"secret1").unwrap();
        let err = deserialize_signed(&bytes, b"secret2").unwrap_err();
        assert!(matches!(err, CacheError::IntegrityError));
    }

    #[test]
    fn tampered_bytes_are_rejected_not_crashed() {
        let r = sample();
        let mut bytes = serialize_signed(&r, b"secret1").unwrap();
        // Overwrite with arbitrary bytes, simulating external corruption.
        for b in bytes.iter_mut().skip(32) {
            *b = 0xFF;
        }
        let err = deserialize_signed(&bytes, b"secret1").unwrap_err();
        assert!(matches!(err, CacheError::IntegrityError));
    }
}
