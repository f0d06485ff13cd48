use url::Url;

/// Extracts the host of a URL in lowercase
///
/// # Examples
///
/// ```
/// use url::Url;
/// use librarian::url::extract_host;
///
/// let url = Url::parse("https://Docs.Example.COM/path").unwrap();
/// assert_eq!(extract_host(&url), Some("docs.example.com".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns `host[:port]` with the port omitted when it is the scheme default
///
/// Two URLs "share a host" for scoping purposes when their host keys match.
pub fn host_key(url: &Url) -> Option<String> {
    let host = extract_host(url)?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}
