//! URL canonicalization, resolution, and regex filtering.
//!
//! Pure functions over the `url` crate. Everything the frontier admits
//! goes through [`normalize`] first, so the visited set and the result
//! records always speak the same canonical form.

use regex::Regex;
use url::Url;

use crate::error::{InvalidUrl, PatternError};

/// Bring a URL into canonical form.
///
/// Canonicalization, on top of what WHATWG parsing already does
/// (lowercased scheme and host, default port dropped, empty path made
/// `/`):
/// - query parameters sorted lexicographically by key, raw values kept
///   verbatim,
/// - fragment dropped,
/// - empty query dropped.
///
/// Only absolute `http`/`https` URLs with a host are accepted; anything
/// else fails with [`InvalidUrl`].
pub fn normalize(raw: &str) -> Result<Url, InvalidUrl> {
    let mut url = Url::parse(raw.trim()).map_err(|e| InvalidUrl {
        input: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(InvalidUrl {
            input: raw.to_string(),
            reason: format!("unsupported scheme `{}`", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(InvalidUrl {
            input: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    url.set_fragment(None);

    match url.query() {
        Some("") | None => url.set_query(None),
        Some(query) => {
            // Sort raw `key=value` components by key without re-encoding,
            // so values round-trip byte for byte. The sort is stable:
            // duplicate keys keep their original value order.
            let mut parts: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
            parts.sort_by_key(|part| part.split('=').next().unwrap_or("").to_string());
            if parts.is_empty() {
                url.set_query(None);
            } else {
                url.set_query(Some(&parts.join("&")));
            }
        }
    }

    Ok(url)
}

/// Resolve a candidate link against a base URL.
///
/// Absolute candidates come back unchanged; relative ones resolve per
/// standard URL resolution.
pub fn resolve(candidate: &str, base: &Url) -> Result<Url, InvalidUrl> {
    base.join(candidate.trim()).map_err(|e| InvalidUrl {
        input: candidate.to_string(),
        reason: e.to_string(),
    })
}

/// Lowercased host component of a URL.
#[must_use]
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Whether the URL's host equals `domain` or is a subdomain of it.
#[must_use]
pub fn same_domain(url: &Url, domain: &str) -> bool {
    let domain = domain.to_lowercase();
    match url.host_str() {
        Some(host) => {
            let host = host.to_lowercase();
            host == domain || host.ends_with(&format!(".{domain}"))
        }
        None => false,
    }
}

/// Pre-compiled include/exclude URL filter.
///
/// Compiled once at crawl setup, never per URL: the regex work happens
/// exactly once and the non-backtracking engine bounds the ReDoS
/// surface of user-supplied patterns.
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl UrlFilter {
    /// Compile include/exclude pattern lists.
    ///
    /// Fails on the first invalid pattern, reporting the offending
    /// string and the compile error.
    pub fn compile(include: &[String], exclude: &[String]) -> Result<Self, PatternError> {
        Ok(Self {
            include: compile_patterns(include)?,
            exclude: compile_patterns(exclude)?,
        })
    }

    /// A URL passes iff the include list is empty or any include
    /// matches, and no exclude matches.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(url)) {
            return false;
        }
        !self.exclude.iter().any(|re| re.is_match(url))
    }

    /// True when the filter lets everything through.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

/// Compile a list of regex strings, failing on the first invalid one.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, PatternError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| PatternError {
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}
