use crate::completion::RequestMode;
use crate::state::Capacity;
use serde::Deserialize;

/// Main configuration structure for Lit-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub dispatch: DispatchConfig,
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub completion: Option<CompletionConfig>,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteConfig>,
}

/// Longest accepted cool-down after a throttling signal (seconds)
pub const MAX_COOLDOWN_SECONDS: f64 = 3600.0;

/// Dispatch loop configuration shared by every loop
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Global ceiling on simultaneously running units of work
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: usize,

    /// Failed attempts after which an item is given up on
    #[serde(rename = "max-redo")]
    pub max_redo: u32,

    /// Pause after a throttling signal (seconds)
    #[serde(rename = "cooldown-seconds")]
    pub cooldown_seconds: f64,

    /// Loop yield between ticks (milliseconds)
    #[serde(rename = "tick-millis", default = "default_tick_millis")]
    pub tick_millis: u64,

    /// Timeout applied to every individual request (seconds)
    #[serde(rename = "request-timeout-seconds", default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_tick_millis() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

/// Remote quota for the completion workload
#[derive(Debug, Clone, Deserialize)]
pub struct CapacityConfig {
    #[serde(rename = "requests-per-minute")]
    pub requests_per_minute: f64,

    /// Optional second dimension
    #[serde(rename = "tokens-per-minute", default)]
    pub tokens_per_minute: Option<f64>,
}

impl CapacityConfig {
    /// Per-minute limits as a capacity vector
    pub fn limits(&self) -> Capacity {
        Capacity {
            requests: self.requests_per_minute,
            secondary: self.tokens_per_minute,
        }
    }
}

/// Cost probe configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_enabled")]
    pub enabled: bool,

    /// Items run before calibrating
    #[serde(rename = "probe-size", default = "default_probe_size")]
    pub probe_size: usize,
}

fn default_probe_enabled() -> bool {
    true
}

fn default_probe_size() -> usize {
    20
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: default_probe_enabled(),
            probe_size: default_probe_size(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the harvester
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the harvester
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the harvester
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for harvester-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header value
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// JSONL outcome log
    #[serde(rename = "log-path")]
    pub log_path: String,

    /// Escalation file, one item per line
    #[serde(rename = "escalation-path")]
    pub escalation_path: String,

    /// Path to the SQLite ledger
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Path to the markdown summary file
    #[serde(rename = "summary-path")]
    pub summary_path: String,

    /// Directory downloaded articles are saved under
    #[serde(rename = "articles-dir")]
    pub articles_dir: String,
}

/// Remote completion endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    pub endpoint: String,

    #[serde(default)]
    pub mode: RequestMode,

    /// Environment variable holding the API key
    #[serde(rename = "api-key-env", default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(rename = "timeout-seconds", default = "default_completion_timeout")]
    pub timeout_seconds: u64,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_completion_timeout() -> u64 {
    60
}

/// One external site the crawler fetches from
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site name
    pub name: String,

    /// Domain pattern (e.g., "pubs.acs.org" or "*.acs.org")
    pub domain: String,

    /// DOI prefixes published by this site
    #[serde(rename = "doi-prefixes", default)]
    pub doi_prefixes: Vec<String>,

    #[serde(rename = "requests-per-minute")]
    pub requests_per_minute: f64,

    /// Serialize requests and reset session state around each one
    #[serde(rename = "single-session", default)]
    pub single_session: bool,

    /// Markers of a bot-challenge page; defaults apply when absent
    #[serde(rename = "challenge-markers", default)]
    pub challenge_markers: Option<Vec<String>>,

    /// URL to fetch, with `{doi}` replaced; the article URL is used when absent
    #[serde(rename = "url-template", default)]
    pub url_template: Option<String>,
}
