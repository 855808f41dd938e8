//! Lit-Harvest: rate-limited, retrying bulk dispatch of remote work
//!
//! This crate implements one generic dispatcher that admits work against a
//! token-bucket quota, retries transient failures, backs off on throttling
//! signals and hands back anything it could not finish. Two workloads are
//! built on it: a multi-site article crawler and a bulk completion-request
//! processor.

pub mod completion;
pub mod config;
pub mod crawler;
pub mod dispatch;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Lit-Harvest operations
///
/// Only setup failures surface here. Per-item failures are reported as
/// [`dispatch::Attempt`] values and never abort a run.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Invalid input {path} line {line}: {message}")]
    Input {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Missing API key: environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("No [completion] section in the configuration")]
    MissingCompletion,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL and DOI errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed DOI or URL: {0}")]
    Malformed(String),
}

/// Result type alias for Lit-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{Attempt, Dispatcher, FailureKind, RunReport, Worker};
pub use state::{ArticleState, Capacity, WorkItem};
