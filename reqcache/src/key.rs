//! Deterministic request fingerprinting.

use std::collections::BTreeMap;

use url::Url;

use crate::response::HeaderMap;

/// Body shape recognized during key normalization. Anything else is hashed
/// as opaque bytes.
pub enum KeyBody<'a> {
    /// A raw byte body, hashed as-is.
    Raw(&'a [u8]),
    /// A JSON object body; ignored-param keys are dropped before
    /// re-serializing with sorted keys.
    Json(&'a serde_json::Value),
    /// A `application/x-www-form-urlencoded` body; ignored-param names are
    /// dropped before sorting.
    Form(&'a str),
}

/// Derives a stable cache key for `(method, url[, body][, headers])`.
///
/// The digest is BLAKE3,
/// which satisfies the "128-bit+ stable hash" requirement with room to
/// spare, hex-encoded for use as a plain storage key string.
pub fn create_key(
    method: &str,
    url: &Url,
    body: Option<KeyBody<'_>>,
    headers: Option<&HeaderMap>,
    ignored_params: &[String],
    include_headers: bool,
) -> String {
    let mut canonical = String::new();
    canonical.push_str(&method.to_ascii_uppercase());
    canonical.push('\n');
    canonical.push_str(&normalize_url(url, ignored_params));
    canonical.push('\n');

    if let Some(body) = body {
        canonical.push_str(&normalize_body(body, ignored_params));
    }
    canonical.push('\n');

    if include_headers {
        if let Some(headers) = headers {
            canonical.push_str(&normalize_headers(headers, ignored_params));
        }
    }

    hex::encode(blake3::hash(canonical.as_bytes()).as_bytes())
}

/// Lowercases scheme/host, strips a default port for that scheme, sorts
/// query parameters lexicographically while preserving repeated
/// occurrences, drops any parameter named in `ignored_params`, and drops
/// the fragment entirely.
fn normalize_url(url: &Url, ignored_params: &[String]) -> String {
    let scheme = url.scheme().to_ascii_lowercase();
    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    let port_suffix = match (url.port(), default_port(&scheme)) {
        (Some(p), Some(default)) if p == default => String::new(),
        (Some(p), _) => format!(":{p}"),
        (None, _) => String::new(),
    };
    let path = url.path();

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !ignored_params.iter().any(|ig| ig == k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    let query = if pairs.is_empty() {
        String::new()
    } else {
        let joined = pairs
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("?{joined}")
    };

    format!("{scheme}://{host}{port_suffix}{path}{query}")
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

fn normalize_body(body: KeyBody<'_>, ignored_params: &[String]) -> String {
    match body {
        KeyBody::Raw(bytes) => hex::encode(bytes),
        KeyBody::Json(value) => {
            let filtered = filter_json(value, ignored_params);
            serde_json::to_string(&filtered).unwrap_or_default()
        }
        KeyBody::Form(raw) => {
            let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(raw.as_bytes())
                .filter(|(k, _)| !ignored_params.iter().any(|ig| ig == k.as_ref()))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            pairs.sort();
            pairs.into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&")
        }
    }
}

/// Recursively drops `ignored_params` keys from a JSON object and
/// re-serializes with sorted keys (via `BTreeMap`) at every object level.
fn filter_json(value: &serde_json::Value, ignored_params: &[String]) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> = map
                .iter()
                .filter(|(k, _)| !ignored_params.iter().any(|ig| ig == *k))
                .map(|(k, v)| (k.clone(), filter_json(v, ignored_params)))
                .collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| filter_json(v, ignored_params)).collect())
        }
        other => other.clone(),
    }
}

fn normalize_headers(headers: &HeaderMap, ignored_params: &[String]) -> String {
    let mut pairs: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .filter(|(k, _)| !ignored_params.iter().any(|ig| ig.to_ascii_lowercase() == *k))
        .collect();
    pairs.sort();
    pairs.into_iter().map(|(k, v)| format!("{k}:{v}")).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn query_param_order_is_irrelevant() {
        let a = create_key("get", &url("http://X.com/p?b=2&a=1"), None, None, &[], false);
        let b = create_key("GET", &url("http://x.com/p?a=1&b=2"), None, None, &[], false);
        assert_eq!(a, b);
    }

    #[test]
    fn default_port_is_stripped() {
        let a = create_key("GET", &url("http://x.com:80/p"), None, None, &[], false);
        let b = create_key("GET", &url("http://x.com/p"), None, None, &[], false);
        assert_eq!(a, b);
    }

    #[test]
    fn non_default_port_distinguishes_requests() {
        let a = create_key("GET", &url("http://x.com:8080/p"), None, None, &[], false);
        let b = create_key("GET", &url("http://x.com/p"), None, None, &[], false);
        assert_ne!(a, b);
    }

    #[test]
    fn ignored_param_does_not_change_key() {
        let ignored = vec!["token".to_string()];
        let a = create_key("GET", &url("http://x/?token=A"), None, None, &ignored, false);
        let b = create_key("GET", &url("http://x/?token=B"), None, None, &ignored, false);
        assert_eq!(a, b);
    }

    #[test]
    fn repeated_param_occurrence_is_preserved() {
        let a = create_key("GET", &url("http://x/?a=1&a=2"), None, None, &[], false);
        let b = create_key("GET", &url("http://x/?a=1"), None, None, &[], false);
        assert_ne!(a, b);
    }

    #[test]
    fn fragment_is_ignored() {
        let a = create_key("GET", &url("http://x/p#frag1"), None, None, &[], false);
        let b = create_key("GET", &url("http://x/p#frag2"), None, None, &[], false);
        assert_eq!(a, b);
    }

    #[test]
    fn create_key_is_pure() {
        let k1 = create_key("GET", &url("http://x/p"), None, None, &[], false);
        let k2 = create_key("GET", &url("http://x/p"), None, None, &[], false);
        assert_eq!(k1, k2);
    }
}
