//! Worker that sends one completion request and reads usage and quota
//! headers from the reply

use crate::completion::mode::RequestMode;
use crate::completion::request::CompletionRequest;
use crate::config::{CompletionConfig, UserAgentConfig};
use crate::dispatch::{Attempt, FailureKind, Usage, Worker};
use crate::state::{Capacity, WorkItem};
use crate::HarvestError;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Header carrying the remaining request quota
pub const REMAINING_REQUESTS_HEADER: &str = "x-ratelimit-remaining-requests";

/// Header carrying the remaining token quota
pub const REMAINING_TOKENS_HEADER: &str = "x-ratelimit-remaining-tokens";

/// A successful completion response
///
/// Only the body is written to the outcome log.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutput {
    pub body: Value,
    pub prompt_tokens: f64,
    pub completion_tokens: f64,

    /// Quota the endpoint reported as remaining
    pub remaining: Option<Capacity>,
    pub observed_at: Instant,
}

impl Serialize for CompletionOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

/// Posts completion requests to a remote endpoint
pub struct CompletionWorker {
    client: Client,
    endpoint: String,
    api_key: String,
    mode: RequestMode,
}

impl CompletionWorker {
    /// Creates a worker with an explicit API key
    pub fn new(
        config: &CompletionConfig,
        user_agent: &UserAgentConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent.header_value())
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: api_key.into(),
            mode: config.mode,
        })
    }

    /// Creates a worker reading the API key from the configured variable
    pub fn from_env(
        config: &CompletionConfig,
        user_agent: &UserAgentConfig,
    ) -> Result<Self, HarvestError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| HarvestError::MissingApiKey(config.api_key_env.clone()))?;
        Ok(Self::new(config, user_agent, api_key)?)
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }
}

#[async_trait]
impl Worker<CompletionRequest> for CompletionWorker {
    type Output = CompletionOutput;

    async fn run(&self, item: &WorkItem<CompletionRequest>) -> Attempt<CompletionOutput> {
        let response = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&item.payload.body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Attempt::failure(FailureKind::Connectivity, "Request timeout")
            }
            Err(e) => return Attempt::failure(FailureKind::Connectivity, e.to_string()),
        };

        let status = response.status();
        let remaining = remaining_quota(response.headers());
        let observed_at = Instant::now();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Attempt::failure(FailureKind::Throttled, "HTTP 429");
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return Attempt::failure(FailureKind::Connectivity, format!("Body read failed: {}", e))
            }
        };

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Attempt::failure(
                    FailureKind::Status(status.as_u16()),
                    format!("HTTP {}", status.as_u16()),
                )
            }
            Err(e) => {
                return Attempt::failure(FailureKind::Validation, format!("Unparsable body: {}", e))
            }
        };

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string);

            let kind = if message.to_lowercase().contains("rate limit") {
                FailureKind::Throttled
            } else if !status.is_success() {
                FailureKind::Status(status.as_u16())
            } else {
                FailureKind::Validation
            };
            return Attempt::failure(kind, message);
        }

        if !status.is_success() {
            return Attempt::failure(
                FailureKind::Status(status.as_u16()),
                format!("HTTP {}", status.as_u16()),
            );
        }

        let (prompt_tokens, completion_tokens) =
            self.mode.usage_tokens(&body).unwrap_or_else(|| {
                (item.estimated_cost.secondary.unwrap_or(0.0), 0.0)
            });

        Attempt::Success(CompletionOutput {
            body,
            prompt_tokens,
            completion_tokens,
            remaining,
            observed_at,
        })
    }

    fn estimate_cost(&self, payload: &CompletionRequest) -> Capacity {
        self.mode.estimate_cost(&payload.body)
    }

    fn usage(&self, output: &CompletionOutput) -> Option<Usage> {
        Some(Usage {
            prompt: output.prompt_tokens,
            completion: output.completion_tokens,
            remaining: output.remaining,
            observed_at: output.observed_at,
        })
    }
}

/// Reads the remaining-quota headers
///
/// Returns `None` unless at least the request quota is present.
pub fn remaining_quota(headers: &HeaderMap) -> Option<Capacity> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
    };

    let requests = read(REMAINING_REQUESTS_HEADER)?;
    Some(Capacity {
        requests,
        secondary: read(REMAINING_TOKENS_HEADER),
    })
}
