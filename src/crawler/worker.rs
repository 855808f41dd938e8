//! Worker that fetches one article from its assigned site

use crate::config::SiteConfig;
use crate::crawler::article::Article;
use crate::crawler::fetcher::fetch_article;
use crate::crawler::fingerprint::Fingerprint;
use crate::crawler::session::SiteSession;
use crate::dispatch::{Attempt, FailureKind, Worker};
use crate::state::WorkItem;
use crate::url::doi_slug;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A saved article page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Download {
    /// Where the page was saved
    pub path: PathBuf,
    /// URL the content came from after redirects
    pub final_url: String,
    pub status_code: u16,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Fetches the articles of one site
///
/// A page matching the site's fingerprint halts the site's loop instead of
/// being saved.
pub struct CrawlWorker {
    site: SiteConfig,
    session: SiteSession,
    fingerprint: Fingerprint,
    site_dir: PathBuf,
}

impl CrawlWorker {
    pub fn new(site: SiteConfig, session: SiteSession, articles_dir: &Path) -> Self {
        let fingerprint = Fingerprint::for_site(&site);
        let site_dir = articles_dir.join(&site.name);
        Self {
            site,
            session,
            fingerprint,
            site_dir,
        }
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    pub fn session(&self) -> &SiteSession {
        &self.session
    }

    /// URL to request for `article`
    pub fn fetch_url(&self, article: &Article) -> String {
        match &self.site.url_template {
            Some(template) => template.replace("{doi}", &article.doi),
            None => article.url.clone(),
        }
    }

    /// Path the page of `article` is saved to
    pub fn save_path(&self, article: &Article) -> PathBuf {
        self.site_dir.join(format!("{}.html", doi_slug(&article.doi)))
    }
}

#[async_trait]
impl Worker<Article> for CrawlWorker {
    type Output = Download;

    async fn run(&self, item: &WorkItem<Article>) -> Attempt<Download> {
        let url = self.fetch_url(&item.payload);
        tracing::debug!("{}: fetching {} from {}", self.site.name, item.payload, url);

        let page = match self
            .session
            .run(|client| async move { fetch_article(&client, &url).await })
            .await
        {
            Attempt::Success(page) => page,
            Attempt::Failure(failure) => return Attempt::Failure(failure),
            Attempt::Halt { reason } => return Attempt::Halt { reason },
        };

        if let Some(hit) = self.fingerprint.check(&page.body) {
            return Attempt::halt(format!(
                "challenge page at {} (marker '{}')",
                page.final_url, hit.marker
            ));
        }

        let path = self.save_path(&item.payload);
        if let Err(e) = tokio::fs::create_dir_all(&self.site_dir).await {
            return Attempt::failure(
                FailureKind::Fatal,
                format!("cannot create {}: {}", self.site_dir.display(), e),
            );
        }
        if let Err(e) = tokio::fs::write(&path, page.body.as_bytes()).await {
            return Attempt::failure(
                FailureKind::Fatal,
                format!("cannot write {}: {}", path.display(), e),
            );
        }

        Attempt::Success(Download {
            title: crate::crawler::fingerprint::extract_title(&page.body),
            path,
            final_url: page.final_url,
            status_code: page.status_code,
            bytes: page.body.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserAgentConfig;
    use std::time::Duration;

    fn worker(template: Option<&str>) -> CrawlWorker {
        let user_agent = UserAgentConfig {
            crawler_name: "TestHarvester".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "admin@example.com".to_string(),
        };
        let site = SiteConfig {
            name: "acs".to_string(),
            domain: "*.acs.org".to_string(),
            doi_prefixes: vec!["10.1021".to_string()],
            requests_per_minute: 10.0,
            single_session: false,
            challenge_markers: None,
            url_template: template.map(str::to_string),
        };
        let session = SiteSession::shared(&user_agent, Duration::from_secs(5)).unwrap();
        CrawlWorker::new(site, session, Path::new("/tmp/articles"))
    }

    #[test]
    fn test_fetch_url_uses_template() {
        let article = Article::from_doi("10.1021/acs.jpca.1c00001");

        assert_eq!(
            worker(None).fetch_url(&article),
            "https://doi.org/10.1021/acs.jpca.1c00001"
        );
        assert_eq!(
            worker(Some("https://pubs.acs.org/doi/{doi}")).fetch_url(&article),
            "https://pubs.acs.org/doi/10.1021/acs.jpca.1c00001"
        );
    }

    #[test]
    fn test_save_path() {
        let article = Article::from_doi("10.1021/acs.jpca.1c00001");
        assert_eq!(
            worker(None).save_path(&article),
            PathBuf::from("/tmp/articles/acs/10.1021_acs.jpca.1c00001.html")
        );
    }
}
