//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings and a cookie store
//! - GET requests to fetch article pages
//! - Classifying every outcome into a dispatcher [`Attempt`]

use crate::config::UserAgentConfig;
use crate::dispatch::{Attempt, FailureKind};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;

/// Maximum redirect hops followed before a fetch fails
const MAX_REDIRECTS: usize = 10;

/// A page retrieved with a success status
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: String,
    /// HTTP status code
    pub status_code: u16,
    /// Content-Type header value (empty if absent)
    pub content_type: String,
    /// Page body content
    pub body: String,
}

/// Builds an HTTP client with proper configuration
///
/// Every client carries its own cookie store, so dropping the client drops
/// the session.
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Timeout applied to every request
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use lit_harvest::config::UserAgentConfig;
/// use lit_harvest::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "LitHarvest".to_string(),
///     crawler_version: "0.1".to_string(),
///     contact_url: "https://example.org/about".to_string(),
///     contact_email: "ops@example.org".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .cookie_store(true)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches an article page and classifies the outcome
///
/// # Classification
///
/// | Condition | Attempt |
/// |-----------|---------|
/// | 2xx with HTML (or no Content-Type) | Success |
/// | HTTP 429 | Failure(Throttled) |
/// | Other non-2xx | Failure(Status) |
/// | 2xx with non-HTML Content-Type | Failure(Validation) |
/// | Timeout, connection or body read error | Failure(Connectivity) |
/// | Too many redirects | Failure(Status) with the last status |
///
/// Fingerprint inspection is left to the caller.
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `url` - The URL to fetch
pub async fn fetch_article(client: &Client, url: &str) -> Attempt<FetchedPage> {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => return classify_transport_error(&e),
    };

    let status = response.status();
    let final_url = response.url().to_string();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Attempt::failure(FailureKind::Throttled, format!("HTTP 429 from {}", final_url));
    }

    if !status.is_success() {
        return Attempt::failure(
            FailureKind::Status(status.as_u16()),
            format!("HTTP {} from {}", status.as_u16(), final_url),
        );
    }

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !content_type.is_empty() && !content_type.contains("html") {
        return Attempt::failure(
            FailureKind::Validation,
            format!("Expected HTML, got {}", content_type),
        );
    }

    match response.text().await {
        Ok(body) => Attempt::Success(FetchedPage {
            final_url,
            status_code: status.as_u16(),
            content_type,
            body,
        }),
        Err(e) => Attempt::failure(FailureKind::Connectivity, format!("Body read failed: {}", e)),
    }
}

fn classify_transport_error<T>(e: &reqwest::Error) -> Attempt<T> {
    if e.is_timeout() {
        Attempt::failure(FailureKind::Connectivity, "Request timeout")
    } else if e.is_connect() {
        Attempt::failure(FailureKind::Connectivity, format!("Connection failed: {}", e))
    } else if e.is_redirect() {
        let code = e.status().map_or(310, |s| s.as_u16());
        Attempt::failure(FailureKind::Status(code), "Too many redirects")
    } else {
        Attempt::failure(FailureKind::Connectivity, e.to_string())
    }
}
