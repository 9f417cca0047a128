use crate::UrlError;
use url::Url;

/// Default tracking and session query parameters removed during canonicalization
pub const DEFAULT_TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
    "ref",
    "source",
    "sessionid",
    "jsessionid",
    "phpsessid",
    "sid",
];

/// Options controlling URL canonicalization
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Scheme every canonical URL is rewritten to
    pub scheme: String,

    /// Whether a leading `www.` is removed from the host
    pub strip_www: bool,

    /// Query parameters dropped from the canonical form (lowercase)
    pub tracking_params: Vec<String>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            strip_www: true,
            tracking_params: DEFAULT_TRACKING_PARAMS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

/// Normalizes a URL into its canonical form
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Reject anything that is not HTTP(S), then force the configured scheme
/// 3. Lowercase the host/domain
/// 4. Optionally remove the www. prefix
/// 5. Normalize path:
///    - Remove dot segments (. and ..)
///    - Collapse repeated slashes
///    - Remove trailing slash (except for root /)
///    - Empty path becomes /
/// 6. Remove fragment (everything after #)
/// 7. Remove tracking query parameters
/// 8. Sort remaining query parameters by key
/// 9. Remove empty query string (trailing ?)
///
/// # Examples
///
/// ```
/// use sumi_dispatch::url::{normalize_url, NormalizeOptions};
///
/// let url = normalize_url("http://WWW.EXAMPLE.COM/page/", &NormalizeOptions::default()).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/page");
/// ```
pub fn normalize_url(url_str: &str, options: &NormalizeOptions) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.scheme() != options.scheme {
        url.set_scheme(&options.scheme)
            .map_err(|_| UrlError::Malformed(format!("Cannot force scheme {}", options.scheme)))?;
    }

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_lowercase(),
        _ => return Err(UrlError::MissingDomain),
    };

    let normalized_host = match host.strip_prefix("www.") {
        Some(rest) if options.strip_www && !rest.is_empty() => rest.to_string(),
        _ => host,
    };

    url.set_host(Some(&normalized_host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url, &options.tracking_params);

        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", segments.join("/"))
}

/// Filters out tracking parameters and sorts remaining query parameters
///
/// The sort is stable, so repeated keys keep their relative order.
fn filter_and_sort_query_params(url: &Url, tracking: &[String]) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key, tracking))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort_by(|a, b| a.0.cmp(&b.0));

    params
}

fn is_tracking_param(key: &str, tracking: &[String]) -> bool {
    let key = key.to_lowercase();
    key.starts_with("utm_") || tracking.iter().any(|t| *t == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(url: &str) -> Result<Url, UrlError> {
        normalize_url(url, &NormalizeOptions::default())
    }

    #[test]
    fn test_http_to_https() {
        let result = normalize("http://example.com/page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_forced_scheme_is_configurable() {
        let options = NormalizeOptions {
            scheme: "http".to_string(),
            ..NormalizeOptions::default()
        };
        let result = normalize_url("https://example.com/page", &options).unwrap();
        assert_eq!(result.as_str(), "http://example.com/page");
    }

    #[test]
    fn test_remove_www() {
        let result = normalize("https://www.example.com/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_keep_www_when_disabled() {
        let options = NormalizeOptions {
            strip_www: false,
            ..NormalizeOptions::default()
        };
        let result = normalize_url("https://www.example.com/", &options).unwrap();
        assert_eq!(result.as_str(), "https://www.example.com/");
    }

    #[test]
    fn test_remove_trailing_slash() {
        let result = normalize("https://example.com/page/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_remove_fragment() {
        let result = normalize("https://example.com/page#section").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_sort_query_params() {
        let result = normalize("https://example.com/page?b=2&a=1").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page?a=1&b=2");
    }

    #[test]
    fn test_session_params_removed_case_insensitively() {
        let result =
            normalize("https://example.com/page?JSESSIONID=abc&keep=yes&PHPSESSID=x").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page?keep=yes");
    }

    #[test]
    fn test_custom_tracking_list() {
        let options = NormalizeOptions {
            tracking_params: vec!["campaign".to_string()],
            ..NormalizeOptions::default()
        };
        let result =
            normalize_url("https://example.com/?campaign=1&ref=x&utm_source=y", &options).unwrap();
        // utm_* is always stripped, "ref" is kept because the custom list replaces the default
        assert_eq!(result.as_str(), "https://example.com/?ref=x");
    }

    #[test]
    fn test_query_values_stay_encoded() {
        let result = normalize("https://example.com/search?q=a%26b&p=1").unwrap();
        assert_eq!(result.as_str(), "https://example.com/search?p=1&q=a%26b");
    }

    #[test]
    fn test_normalize_path_with_dots() {
        let result = normalize("https://example.com/a/../b/./c").unwrap();
        assert_eq!(result.as_str(), "https://example.com/b/c");
    }

    #[test]
    fn test_lowercase_domain_keeps_path_case() {
        let result = normalize("https://EXAMPLE.COM/Page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Page");
    }

    #[test]
    fn test_complex_normalization() {
        let result = normalize("http://WWW.EXAMPLE.COM/a/../b/?utm_source=test#fragment").unwrap();
        assert_eq!(result.as_str(), "https://example.com/b");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize("ftp://example.com/page");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_malformed_url() {
        assert!(matches!(normalize("not a url"), Err(UrlError::Parse(_))));
    }

    #[test]
    fn test_empty_path_becomes_root() {
        let result = normalize("https://example.com").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_multiple_slashes() {
        let result = normalize("https://example.com///path//to///page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/path/to/page");
    }

    #[test]
    fn test_explicit_port_is_kept() {
        let result = normalize("http://127.0.0.1:8080/x").unwrap();
        assert_eq!(result.as_str(), "https://127.0.0.1:8080/x");
    }
}
