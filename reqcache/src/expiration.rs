//! Cache-Control interpretation and expiration resolution.

use crate::error::{CacheError, Result};
use crate::response::now_unix;

/// How long a stored response should live,
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpireAfter {
    /// Never expires.
    #[default]
    Never,
    /// Expires instantly — caching this response should be skipped.
    Immediate,
    /// Expires `n` seconds after it's written.
    Duration(u64),
    /// Expires at a specific instant (seconds since the Unix epoch).
    Instant(u64),
}

impl ExpireAfter {
    /// Maps the CLI/config convention of `-1 => Never`, `0 => Immediate`,
    /// `n > 0 => Duration(n)` onto an [`ExpireAfter`].
    pub fn from_seconds(seconds: i64) -> Self {
        match seconds {
            s if s < 0 => ExpireAfter::Never,
            0 => ExpireAfter::Immediate,
            s => ExpireAfter::Duration(s as u64),
        }
    }

    /// Projects this value onto an absolute UTC instant (seconds since the
    /// Unix epoch) relative to `now`. Returns `None` for `Never` and for
    /// `Immediate` (the caller must separately check
    /// [`ExpireAfter::skips_write`] to distinguish the two).
    pub fn resolve(self, now: u64) -> Option<u64> {
        match self {
            ExpireAfter::Never => None,
            ExpireAfter::Immediate => None,
            ExpireAfter::Duration(secs) => Some(now + secs),
            ExpireAfter::Instant(at) => Some(at),
        }
    }

    /// True when this value means "do not write to the cache at all".
    pub fn skips_write(self) -> bool {
        matches!(self, ExpireAfter::Immediate)
    }
}

/// An ordered table of `(glob, ExpireAfter)` pairs matched against a
/// request's base URL; first match wins.
#[derive(Debug, Clone, Default)]
pub struct UrlPatternTable {
    entries: Vec<(String, ExpireAfter)>,
}

impl UrlPatternTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Appends a pattern, validating it eagerly (`InvalidPattern`).
    pub fn push(&mut self, pattern: impl Into<String>, expire: ExpireAfter) -> Result<()> {
        let pattern = pattern.into();
        validate_pattern(&pattern)?;
        self.entries.push((pattern, expire));
        Ok(())
    }

    /// Finds the first pattern (in insertion order) matching `base_url`
    /// (scheme stripped, e.g. `"example.com/static"`).
    pub fn match_first(&self, base_url: &str) -> Option<ExpireAfter> {
        self.entries
            .iter()
            .find(|(pattern, _)| glob_match(pattern, base_url))
            .map(|(_, expire)| *expire)
    }
}

fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Err(CacheError::InvalidPattern(pattern.to_string()));
    }
    Ok(())
}

/// `*` matches one host-label or path segment (no `/` or `.` crossing);
/// `**` matches any sequence of path segments, including empty. A pattern
/// with no wildcard suffix also matches one path segment below its literal
/// path, mirroring the original `fnmatch(url, pattern) or fnmatch(url,
/// pattern.rstrip('/') + '/*')` behavior this was ported from.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let text_parts: Vec<&str> = text.split('/').collect();
    if match_parts(&pattern_parts, &text_parts) {
        return true;
    }
    let trimmed = pattern.trim_end_matches('/');
    let extended = format!("{trimmed}/*");
    let extended_parts: Vec<&str> = extended.split('/').collect();
    match_parts(&extended_parts, &text_parts)
}

fn match_parts(pattern: &[&str], text: &[&str]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(&"**") => {
            if pattern.len() == 1 {
                return true;
            }
            (0..=text.len()).any(|i| match_parts(&pattern[1..], &text[i..]))
        }
        Some(p) => {
            if text.is_empty() {
                return false;
            }
            segment_match(p, text[0]) && match_parts(&pattern[1..], &text[1..])
        }
    }
}

fn segment_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<&str> = pattern.split('*').collect();
    if pattern_chars.len() == 1 {
        return pattern == text;
    }
    let mut pos = 0usize;
    for (i, chunk) in pattern_chars.iter().enumerate() {
        if chunk.is_empty() {
            continue;
        }
        if i == 0 {
            if !text[pos..].starts_with(chunk) {
                return false;
            }
            pos += chunk.len();
        } else if i == pattern_chars.len() - 1 {
            return text[pos..].ends_with(chunk);
        } else if let Some(found) = text[pos..].find(chunk) {
            pos += found + chunk.len();
        } else {
            return false;
        }
    }
    true
}

/// A parsed `Cache-Control` header: the directives relevant to expiration
/// resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheControlDirectives {
    /// `no-store` — skip read and write entirely.
    pub no_store: bool,
    /// `no-cache` — skip read, proceed to fetch.
    pub no_cache: bool,
    /// `max-age=N`.
    pub max_age: Option<u64>,
    /// `only-if-cached` — never contact the network; a miss should be
    /// reported as unsatisfiable rather than fetched.
    pub only_if_cached: bool,
}

impl CacheControlDirectives {
    /// Parses the directives out of a raw `Cache-Control` header value.
    pub fn parse(raw: &str) -> Self {
        let mut out = Self::default();
        for directive in raw.split(',') {
            let directive = directive.trim();
            if directive.eq_ignore_ascii_case("no-store") {
                out.no_store = true;
            } else if directive.eq_ignore_ascii_case("no-cache") {
                out.no_cache = true;
            } else if directive.eq_ignore_ascii_case("only-if-cached") {
                out.only_if_cached = true;
            } else if let Some(rest) = directive
                .split_once('=')
                .filter(|(k, _)| k.trim().eq_ignore_ascii_case("max-age"))
            {
                out.max_age = rest.1.trim().parse().ok();
            }
        }
        out
    }
}

/// Parses an RFC 5322 / RFC 7231 HTTP-date into seconds since the Unix epoch.
pub fn parse_http_date(raw: &str) -> Option<u64> {
    httpdate::parse_http_date(raw)
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
}

/// Inputs available when resolving the effective expiration of a request,
/// following a fixed precedence from request-level overrides down to the
/// session default.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpirationRequestContext<'a> {
    /// Whether `cache_control` interpretation is enabled for this session.
    pub cache_control_enabled: bool,
    /// The request's own `Cache-Control` header, if present.
    pub request_cache_control: Option<&'a str>,
    /// A per-request `expire_after` override (step 5).
    pub per_request_expire_after: Option<ExpireAfter>,
    /// The base URL (scheme stripped) used against `urls_expire_after`.
    pub base_url: &'a str,
    /// The `urls_expire_after` table (step 6).
    pub url_patterns: Option<&'a UrlPatternTable>,
    /// The session default (step 7).
    pub session_default: ExpireAfter,
}

/// Whether to read from, and/or write to, the cache for this request —
/// the outcome of resolution steps 1-2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadWritePolicy {
    /// False means skip the cache lookup entirely.
    pub can_read: bool,
    /// False means never write a response for this request.
    pub can_write: bool,
}

/// Steps 1-2 of the precedence: request-side `no-store`/`no-cache` handling.
pub fn resolve_read_write_policy(ctx: &ExpirationRequestContext<'_>) -> ReadWritePolicy {
    if !ctx.cache_control_enabled {
        return ReadWritePolicy { can_read: true, can_write: true };
    }
    let directives = ctx
        .request_cache_control
        .map(CacheControlDirectives::parse)
        .unwrap_or_default();
    if directives.no_store {
        return ReadWritePolicy { can_read: false, can_write: false };
    }
    if directives.no_cache {
        return ReadWritePolicy { can_read: false, can_write: true };
    }
    ReadWritePolicy { can_read: true, can_write: true }
}

/// Resolves the effective [`ExpireAfter`] for a request, steps 3 and 5-7 of
/// the precedence (step 4, the response-side rules, is
/// [`resolve_response_expiration`]).
pub fn resolve_request_expire_after(ctx: &ExpirationRequestContext<'_>) -> ExpireAfter {
    if ctx.cache_control_enabled {
        if let Some(raw) = ctx.request_cache_control {
            let directives = CacheControlDirectives::parse(raw);
            if let Some(max_age) = directives.max_age {
                return ExpireAfter::Duration(max_age);
            }
        }
    }
    if let Some(expire) = ctx.per_request_expire_after {
        return expire;
    }
    if let Some(table) = ctx.url_patterns {
        if let Some(expire) = table.match_first(ctx.base_url) {
            return expire;
        }
    }
    ctx.session_default
}

/// Step 4 of the precedence: response-side Cache-Control rules, applied after
/// [`resolve_request_expire_after`]. Returns `None` when the response
/// forbids storage outright (`no-store`); otherwise returns the
/// [`ExpireAfter`] to use, which may still fall back to `fallback` when the
/// response carries no caching directives of its own.
pub fn resolve_response_expiration(
    cache_control_enabled: bool,
    response_cache_control: Option<&str>,
    response_expires_header: Option<&str>,
    fallback: ExpireAfter,
) -> Option<ExpireAfter> {
    if !cache_control_enabled {
        return Some(fallback);
    }
    if let Some(raw) = response_cache_control {
        let directives = CacheControlDirectives::parse(raw);
        if directives.no_store {
            return None;
        }
        if let Some(max_age) = directives.max_age {
            return Some(ExpireAfter::Duration(max_age));
        }
    }
    if let Some(raw) = response_expires_header {
        if let Some(at) = parse_http_date(raw) {
            return Some(ExpireAfter::Instant(at));
        }
    }
    Some(fallback)
}

/// Resolves an [`ExpireAfter`] to an absolute "now" instant for
/// `is_expired` comparisons elsewhere.
pub fn current_time() -> u64 {
    now_unix()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_seconds_negative_is_never() {
        assert_eq!(ExpireAfter::from_seconds(-1), ExpireAfter::Never);
    }

    #[test]
    fn from_seconds_zero_is_immediate() {
        assert_eq!(ExpireAfter::from_seconds(0), ExpireAfter::Immediate);
        assert!(ExpireAfter::Immediate.skips_write());
    }

    #[test]
    fn url_pattern_first_match_wins() {
        let mut table = UrlPatternTable::new();
        table.push("*.example.com", ExpireAfter::Duration(60)).unwrap();
        table.push("example.com/static", ExpireAfter::Never).unwrap();

        assert_eq!(table.match_first("api.example.com/x"), Some(ExpireAfter::Duration(60)));
        assert_eq!(table.match_first("example.com/static/y"), Some(ExpireAfter::Never));
    }

    #[test]
    fn bare_pattern_matches_one_segment_below_its_literal_path() {
        let mut table = UrlPatternTable::new();
        table.push("example.com/static", ExpireAfter::Never).unwrap();
        assert_eq!(table.match_first("example.com/static"), Some(ExpireAfter::Never));
        assert_eq!(table.match_first("example.com/static/y"), Some(ExpireAfter::Never));
        assert_eq!(table.match_first("example.com/static/y/z"), None);
        assert_eq!(table.match_first("other.com/z"), None);
    }

    #[test]
    fn double_star_matches_any_path_depth() {
        let mut table = UrlPatternTable::new();
        table.push("example.com/static/**", ExpireAfter::Never).unwrap();
        assert_eq!(table.match_first("example.com/static/y"), Some(ExpireAfter::Never));
        assert_eq!(table.match_first("example.com/static"), Some(ExpireAfter::Never));
        assert_eq!(table.match_first("other.com/z"), None);
    }

    #[test]
    fn no_store_request_skips_read_and_write() {
        let ctx = ExpirationRequestContext {
            cache_control_enabled: true,
            request_cache_control: Some("no-store"),
            ..Default::default()
        };
        let policy = resolve_read_write_policy(&ctx);
        assert!(!policy.can_read && !policy.can_write);
    }

    #[test]
    fn no_cache_request_skips_read_only() {
        let ctx = ExpirationRequestContext {
            cache_control_enabled: true,
            request_cache_control: Some("no-cache"),
            ..Default::default()
        };
        let policy = resolve_read_write_policy(&ctx);
        assert!(!policy.can_read && policy.can_write);
    }

    #[test]
    fn only_if_cached_directive_is_recognized() {
        let directives = CacheControlDirectives::parse("only-if-cached, max-age=0");
        assert!(directives.only_if_cached);
    }

    #[test]
    fn response_no_store_forbids_write() {
        let resolved = resolve_response_expiration(
            true,
            Some("no-store"),
            None,
            ExpireAfter::Duration(60),
        );
        assert_eq!(resolved, None);
    }

    #[test]
    fn response_max_age_wins_over_expires_header() {
        let resolved = resolve_response_expiration(
            true,
            Some("max-age=30"),
            Some("Wed, 21 Oct 2099 07:28:00 GMT"),
            ExpireAfter::Never,
        );
        assert_eq!(resolved, Some(ExpireAfter::Duration(30)));
    }
}
