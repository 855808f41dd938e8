use url::Url;

/// Extracts the lowercase host of a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use lit_harvest::url::extract_domain;
///
/// let url = Url::parse("https://PUBS.acs.org/doi/10.1021/x").unwrap();
/// assert_eq!(extract_domain(&url), Some("pubs.acs.org".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Parses `raw` and extracts its lowercase host
///
/// Returns `None` for anything that is not an absolute http(s) URL.
pub fn domain_of(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" | "https" => extract_domain(&url),
        _ => None,
    }
}
