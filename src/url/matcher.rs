/// Checks if a domain matches a wildcard pattern
///
/// `"example.com"` matches only itself. `"*.example.com"` matches the bare
/// domain and any subdomain at any depth. Both sides are expected to be
/// lowercase already.
///
/// # Examples
///
/// ```
/// use lit_harvest::url::matches_wildcard;
///
/// assert!(matches_wildcard("*.acs.org", "acs.org"));
/// assert!(matches_wildcard("*.acs.org", "pubs.acs.org"));
/// assert!(!matches_wildcard("*.acs.org", "notacs.org"));
/// assert!(!matches_wildcard("pubs.acs.org", "www.pubs.acs.org"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            candidate == base
                || candidate
                    .strip_suffix(base)
                    .map_or(false, |head| head.ends_with('.'))
        }
        None => candidate == pattern,
    }
}

/// Checks if a normalized DOI falls under a registrant prefix
///
/// The prefix matches the registrant part exactly (`10.1021` matches
/// `10.1021/abc` but not `10.10211/abc`). A prefix may also name a deeper
/// sub-prefix such as `10.1021/acs`.
pub fn matches_doi_prefix(prefix: &str, doi: &str) -> bool {
    let prefix = prefix.trim().trim_end_matches('/').to_lowercase();
    if prefix.is_empty() {
        return false;
    }

    match doi.strip_prefix(prefix.as_str()) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.contains('/'),
        None => false,
    }
}
