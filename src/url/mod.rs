//! URL canonicalization for Sumi-Dispatch
//!
//! This module turns raw URLs into a canonical string, a fixed-length
//! fingerprint used for dedup, and the host key the politeness layer
//! governs.

mod fingerprint;
mod host;
mod normalize;

use crate::config::CanonicalConfig;
use crate::UrlError;
use url::Url;

pub use fingerprint::Fingerprint;
pub use host::host_key;
pub use normalize::{normalize_url, NormalizeOptions, DEFAULT_TRACKING_PARAMS};

/// A URL after canonicalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalUrl {
    /// The URL as it should be fetched (parsed, fragment removed)
    pub url: Url,

    /// The canonical string form
    pub canonical: String,

    /// Hash of `canonical`
    pub fingerprint: Fingerprint,

    /// Politeness key derived from the canonical host
    pub host: String,
}

/// Normalizes URLs into canonical strings and fingerprints
///
/// Canonicalization is a pure function of the configured options; the only
/// failure mode is a malformed or unsupported URL.
#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    options: NormalizeOptions,
}

impl Canonicalizer {
    pub fn new(options: NormalizeOptions) -> Self {
        Self { options }
    }

    /// Builds a canonicalizer from the `[canonical]` config section
    pub fn from_config(config: &CanonicalConfig) -> Self {
        Self::new(NormalizeOptions {
            scheme: config.scheme.to_lowercase(),
            strip_www: config.strip_www,
            tracking_params: config
                .tracking_params
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        })
    }

    /// Canonicalizes a URL
    ///
    /// # Examples
    ///
    /// ```
    /// use sumi_dispatch::url::Canonicalizer;
    ///
    /// let canon = Canonicalizer::default();
    /// let a = canon.normalize("http://www.example.com/a?b=2&a=1#top").unwrap();
    /// let b = canon.normalize("https://example.com/a/?a=1&b=2&utm_source=x").unwrap();
    /// assert_eq!(a.fingerprint, b.fingerprint);
    /// assert_eq!(a.canonical, "https://example.com/a?a=1&b=2");
    /// ```
    pub fn normalize(&self, raw: &str) -> Result<CanonicalUrl, UrlError> {
        let canonical_url = normalize_url(raw, &self.options)?;
        let host = host_key(&canonical_url).ok_or(UrlError::MissingDomain)?;

        let mut fetch_url = Url::parse(raw.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;
        fetch_url.set_fragment(None);

        let canonical = canonical_url.to_string();
        let fingerprint = Fingerprint::of(&canonical);

        Ok(CanonicalUrl {
            url: fetch_url,
            canonical,
            fingerprint,
            host,
        })
    }

    pub fn options(&self) -> &NormalizeOptions {
        &self.options
    }
}
