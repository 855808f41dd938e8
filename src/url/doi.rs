use crate::{UrlError, UrlResult};
use url::Url;

/// Base of the public DOI resolver
pub const DOI_RESOLVER: &str = "https://doi.org/";

/// Normalizes a DOI given bare, with a `doi:` prefix, or as a resolver URL
///
/// DOIs are case-insensitive, so the result is lowercase.
///
/// # Examples
///
/// ```
/// use lit_harvest::url::normalize_doi;
///
/// assert_eq!(normalize_doi("doi:10.1021/ACS.JPCA").unwrap(), "10.1021/acs.jpca");
/// assert_eq!(normalize_doi("https://doi.org/10.1039%2Fc9sc01234a").unwrap(), "10.1039/c9sc01234a");
/// ```
pub fn normalize_doi(input: &str) -> UrlResult<String> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    let body = if let Some(rest) = lower.strip_prefix("doi:") {
        rest.trim().to_string()
    } else if lower.starts_with("http://") || lower.starts_with("https://") {
        let url = Url::parse(trimmed).map_err(|e| UrlError::Parse(e.to_string()))?;
        let host = url.host_str().unwrap_or_default().to_lowercase();
        if host != "doi.org" && host != "dx.doi.org" {
            return Err(UrlError::Malformed(format!("not a DOI resolver URL: {}", trimmed)));
        }
        percent_decode(url.path().trim_start_matches('/')).to_lowercase()
    } else {
        lower
    };

    validate_doi(&body)?;
    Ok(body)
}

/// Finds a DOI embedded in an arbitrary article URL
///
/// Publisher URLs usually carry the DOI in their path
/// (`https://pubs.acs.org/doi/10.1021/acs.jpca.1c00001`).
pub fn doi_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let path = percent_decode(url.path());

    let start = path.find("10.")?;
    let candidate: String = path[start..]
        .split(|c: char| c == '?' || c == '#')
        .next()
        .unwrap_or_default()
        .trim_end_matches('/')
        .to_lowercase();

    // Keep registrant plus suffix, dropping trailing path segments such as
    // "/full" or "/abstract" that some publishers append.
    let mut parts = candidate.splitn(3, '/');
    let prefix = parts.next()?;
    let suffix = parts.next()?;
    let doi = format!("{}/{}", prefix, suffix);

    validate_doi(&doi).ok().map(|_| doi)
}

fn validate_doi(doi: &str) -> UrlResult<()> {
    let (prefix, suffix) = doi
        .split_once('/')
        .ok_or_else(|| UrlError::Malformed(format!("DOI has no suffix: {}", doi)))?;

    let registrant = prefix
        .strip_prefix("10.")
        .ok_or_else(|| UrlError::Malformed(format!("DOI must start with '10.': {}", doi)))?;

    if registrant.is_empty() || !registrant.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(UrlError::Malformed(format!("invalid DOI registrant: {}", doi)));
    }

    if suffix.is_empty() || suffix.chars().any(char::is_whitespace) {
        return Err(UrlError::Malformed(format!("invalid DOI suffix: {}", doi)));
    }

    Ok(())
}

/// The registrant prefix of a normalized DOI (`10.1021` for `10.1021/x`)
pub fn doi_prefix(doi: &str) -> &str {
    doi.split_once('/').map_or(doi, |(prefix, _)| prefix)
}

/// Resolver URL of a normalized DOI
pub fn resolver_url(doi: &str) -> String {
    format!("{}{}", DOI_RESOLVER, doi)
}

/// Filesystem-safe name derived from a DOI
pub fn doi_slug(doi: &str) -> String {
    doi.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
