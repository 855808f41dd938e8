use crate::output::LogEntry;
use crate::url::{doi_from_url, normalize_doi, resolver_url};
use crate::{HarvestError, UrlError, UrlResult};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use url::Url;

/// One article to download
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Article {
    /// Normalized (lowercase) DOI
    pub doi: String,

    /// URL the article is fetched from unless its site has a URL template
    pub url: String,
}

impl Article {
    /// Parses one input line: a DOI, a resolver URL or a publisher URL
    ///
    /// Publisher URLs keep their original form but must carry a DOI in
    /// their path. Everything else is fetched through the DOI resolver.
    pub fn parse(line: &str) -> UrlResult<Self> {
        let line = line.trim();
        let lower = line.to_lowercase();

        if !lower.contains("://") {
            let doi = normalize_doi(line)?;
            return Ok(Self::from_doi(doi));
        }

        let url = Url::parse(line).map_err(|e| UrlError::Parse(e.to_string()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(UrlError::InvalidScheme(url.scheme().to_string()));
        }
        let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();

        if host == "doi.org" || host == "dx.doi.org" {
            let doi = normalize_doi(line)?;
            return Ok(Self::from_doi(doi));
        }

        let doi = doi_from_url(line)
            .ok_or_else(|| UrlError::Malformed(format!("no DOI found in URL: {}", line)))?;
        Ok(Self {
            doi,
            url: url.to_string(),
        })
    }

    /// Builds an article fetched through the DOI resolver
    pub fn from_doi(doi: impl Into<String>) -> Self {
        let doi = doi.into();
        let url = resolver_url(&doi);
        Self { doi, url }
    }
}

impl fmt::Display for Article {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.doi)
    }
}

impl LogEntry for Article {
    fn request(&self) -> Value {
        json!({ "doi": self.doi, "url": self.url })
    }
}

/// Reads the article list at `path`
///
/// One DOI or URL per line. Blank lines and lines starting with `#` are
/// skipped, unparsable lines are skipped with a warning and repeated DOIs
/// are kept once.
///
/// # Arguments
///
/// * `path` - Path to the article list
///
/// # Returns
///
/// The articles in input order
pub fn load_articles(path: &Path) -> Result<Vec<Article>, HarvestError> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_articles(&content, &path.display().to_string()))
}

fn parse_articles(content: &str, origin: &str) -> Vec<Article> {
    let mut seen = HashSet::new();
    let mut articles = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match Article::parse(line) {
            Ok(article) => {
                if seen.insert(article.doi.clone()) {
                    articles.push(article);
                } else {
                    tracing::debug!("{}:{}: duplicate DOI {}", origin, index + 1, article.doi);
                }
            }
            Err(e) => {
                tracing::warn!("{}:{}: skipping '{}': {}", origin, index + 1, line, e);
            }
        }
    }

    articles
}
