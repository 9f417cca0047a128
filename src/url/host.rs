use url::Url;

/// Extracts the politeness key of a URL
///
/// The key is the lowercase host, followed by `:port` when the URL carries an
/// explicit non-default port. Two servers on the same machine but different
/// ports are therefore governed separately.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_dispatch::url::host_key;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(host_key(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("http://127.0.0.1:8080/").unwrap();
/// assert_eq!(host_key(&url), Some("127.0.0.1:8080".to_string()));
/// ```
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}
