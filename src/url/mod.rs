//! URL and DOI handling for Lit-Harvest
//!
//! This module provides DOI normalization, domain extraction, wildcard
//! matching, and assignment of articles to configured sites.

mod doi;
mod domain;
mod matcher;

use crate::config::SiteConfig;

pub use doi::{doi_from_url, doi_prefix, doi_slug, normalize_doi, resolver_url, DOI_RESOLVER};
pub use domain::{domain_of, extract_domain};
pub use matcher::{matches_doi_prefix, matches_wildcard};

/// Finds the site an article belongs to
///
/// Sites are checked in the following priority order:
/// 1. A site whose DOI prefixes cover the article's DOI
/// 2. A site whose domain pattern matches the article URL's host
///
/// Within each step the first configured site wins.
///
/// # Arguments
///
/// * `doi` - The normalized DOI
/// * `url` - The URL the article was listed with
/// * `sites` - Configured sites
///
/// # Returns
///
/// The index of the assigned site, or `None` if no site matches
pub fn assign_site(doi: &str, url: &str, sites: &[SiteConfig]) -> Option<usize> {
    if let Some(index) = sites
        .iter()
        .position(|s| s.doi_prefixes.iter().any(|p| matches_doi_prefix(p, doi)))
    {
        return Some(index);
    }

    let domain = domain_of(url)?;
    sites
        .iter()
        .position(|s| matches_wildcard(&s.domain.to_lowercase(), &domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(name: &str, domain: &str, prefixes: &[&str]) -> SiteConfig {
        SiteConfig {
            name: name.to_string(),
            domain: domain.to_string(),
            doi_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
            requests_per_minute: 10.0,
            single_session: false,
            challenge_markers: None,
            url_template: None,
        }
    }

    fn sites() -> Vec<SiteConfig> {
        vec![
            site("acs", "*.acs.org", &["10.1021"]),
            site("rsc", "pubs.rsc.org", &["10.1039"]),
            site("wiley", "*.wiley.com", &[]),
        ]
    }

    #[test]
    fn test_assign_by_doi_prefix() {
        let sites = sites();
        assert_eq!(
            assign_site("10.1039/c9sc01234a", "https://doi.org/10.1039/c9sc01234a", &sites),
            Some(1)
        );
    }

    #[test]
    fn test_doi_prefix_beats_domain() {
        let sites = sites();
        assert_eq!(
            assign_site("10.1021/x", "https://pubs.rsc.org/some/page", &sites),
            Some(0)
        );
    }

    #[test]
    fn test_assign_by_domain() {
        let sites = sites();
        assert_eq!(
            assign_site(
                "10.1002/anie.2020",
                "https://onlinelibrary.wiley.com/doi/10.1002/anie.2020",
                &sites
            ),
            Some(2)
        );
    }

    #[test]
    fn test_unassigned() {
        let sites = sites();
        assert_eq!(
            assign_site("10.1016/j.cell", "https://doi.org/10.1016/j.cell", &sites),
            None
        );
        assert_eq!(assign_site("10.1016/j.cell", "not a url", &sites), None);
        assert_eq!(assign_site("10.1021/x", "", &[]), None);
    }
}
