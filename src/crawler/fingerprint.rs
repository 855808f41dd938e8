//! Bot-challenge detection
//!
//! Some sites answer automated traffic with an interstitial challenge page
//! and a 200 status. The fingerprint check looks for known markers in the
//! page title and body; a hit means the site, not the article, has failed.

use crate::config::SiteConfig;
use scraper::{Html, Selector};

/// Markers used when a site configures none
///
/// Matched case-insensitively.
pub const DEFAULT_CHALLENGE_MARKERS: &[&str] = &[
    "just a moment...",
    "attention required! | cloudflare",
    "cf-browser-verification",
    "cf-challenge",
    "checking your browser before accessing",
    "are you a robot",
    "px-captcha",
    "g-recaptcha",
];

/// A positive fingerprint match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMatch {
    /// The marker that matched
    pub marker: String,

    /// Title of the challenge page, if it had one
    pub title: Option<String>,
}

/// Case-insensitive marker search over fetched pages
#[derive(Debug, Clone)]
pub struct Fingerprint {
    markers: Vec<String>,
}

impl Fingerprint {
    /// Creates a check for the given markers
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// The check configured for `site`, falling back to the defaults
    pub fn for_site(site: &SiteConfig) -> Self {
        match &site.challenge_markers {
            Some(markers) => Self::new(markers),
            None => Self::default(),
        }
    }

    /// Inspects a page body
    ///
    /// The `<title>` is checked first so the reported marker is the one a
    /// human would see.
    pub fn check(&self, body: &str) -> Option<ChallengeMatch> {
        let title = extract_title(body);

        if let Some(title) = &title {
            let lower = title.to_lowercase();
            if let Some(marker) = self.markers.iter().find(|m| lower.contains(m.as_str())) {
                return Some(ChallengeMatch {
                    marker: marker.clone(),
                    title: Some(title.clone()),
                });
            }
        }

        let lower = body.to_lowercase();
        self.markers
            .iter()
            .find(|m| lower.contains(m.as_str()))
            .map(|marker| ChallengeMatch {
                marker: marker.clone(),
                title,
            })
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new(DEFAULT_CHALLENGE_MARKERS)
    }
}

/// Extracts the page title from an HTML document
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}
