use crate::UrlError;
use serde::Deserialize;
use url::Url;

/// Tracking query parameters removed when `strip-tracking-params` is on
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
];

/// What to do with a trailing `/` on non-root paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingSlash {
    /// `/docs/` and `/docs` are the same page
    #[default]
    Strip,
    /// `/docs/` and `/docs` are distinct pages
    Keep,
}

/// The canonicalization rules, fixed at startup
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CanonicalPolicy {
    #[serde(rename = "trailing-slash")]
    pub trailing_slash: TrailingSlash,

    /// Query parameter order does not matter
    #[serde(rename = "sort-query")]
    pub sort_query: bool,

    /// Drop `utm_*`, `fbclid` and friends
    #[serde(rename = "strip-tracking-params")]
    pub strip_tracking_params: bool,

    /// Fold path segments to lowercase (for case-insensitive servers)
    #[serde(rename = "lowercase-path")]
    pub lowercase_path: bool,
}

impl Default for CanonicalPolicy {
    fn default() -> Self {
        Self {
            trailing_slash: TrailingSlash::Strip,
            sort_query: true,
            strip_tracking_params: true,
            lowercase_path: false,
        }
    }
}

/// Canonicalizes a URL according to the given policy
///
/// # Canonicalization Steps
///
/// 1. Parse the URL; reject if malformed, not http(s), or without host
/// 2. Scheme and host are lowercased and the default port dropped by parsing
/// 3. Normalize path:
///    - Remove dot segments and empty segments
///    - Apply the trailing slash policy (root always stays `/`)
///    - Optionally lowercase
/// 4. Remove fragment
/// 5. Optionally remove tracking query parameters
/// 6. Optionally sort remaining query parameters
/// 7. Remove empty query string
///
/// The result is a fixed point: canonicalizing it again yields the same URL.
///
/// # Examples
///
/// ```
/// use site_indexer::url::{canonicalize, CanonicalPolicy};
///
/// let url = canonicalize("HTTPS://Example.COM:443/a/#top", &CanonicalPolicy::default()).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/a");
/// ```
pub fn canonicalize(url_str: &str, policy: &CanonicalPolicy) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlError::MissingHost),
    }

    if !url.username().is_empty() || url.password().is_some() {
        url.set_username("")
            .and_then(|_| url.set_password(None))
            .map_err(|_| UrlError::Malformed("cannot strip credentials".to_string()))?;
    }

    let normalized_path = normalize_path(url.path(), policy);
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_query_params(&url, policy);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and applying the slash policy
fn normalize_path(path: &str, policy: &CanonicalPolicy) -> String {
    let had_trailing_slash = path.len() > 1 && path.ends_with('/');

    let mut normalized_segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                normalized_segments.pop();
            }
            _ => normalized_segments.push(segment),
        }
    }

    if normalized_segments.is_empty() {
        return "/".to_string();
    }

    let mut result = format!("/{}", normalized_segments.join("/"));
    if had_trailing_slash && policy.trailing_slash == TrailingSlash::Keep {
        result.push('/');
    }

    if policy.lowercase_path {
        result = result.to_lowercase();
    }

    result
}

/// Removes tracking parameters and optionally sorts the rest
fn filter_query_params(url: &Url, policy: &CanonicalPolicy) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !(policy.strip_tracking_params && is_tracking_param(key)))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if policy.sort_query {
        params.sort();
    }

    params
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
