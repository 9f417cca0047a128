//! HTML link extraction
//!
//! Links feed the frontier, so this only needs the targets a crawler would
//! follow: anchors and canonical links.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// What a fetched HTML page contributes to the job
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub title: Option<String>,

    /// Absolute http(s) URLs in document order, without duplicates
    pub links: Vec<String>,
}

/// Parses HTML content and extracts the links to follow
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">`
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - fragment-only links
///
/// `rel="nofollow"` links are followed. Fragments are dropped from the
/// resolved URLs.
///
/// # Example
///
/// ```
/// use sumi_dispatch::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links, vec!["https://example.com/page".to_string()]);
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, base_url),
    }
}

/// Links only; what the fetcher hands back as discovered links
pub fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href], link[rel='canonical'][href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&selector) {
        let element = element.value();
        if element.name() == "a" && element.attr("download").is_some() {
            continue;
        }
        let Some(link) = element.attr("href").and_then(|h| resolve_link(h, base_url)) else {
            continue;
        };
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }
    links
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolves a link href to an absolute http(s) URL without fragment
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut absolute = base_url.join(href).ok()?;
    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }
    absolute.set_fragment(None);
    Some(absolute.to_string())
}
