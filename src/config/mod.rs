//! Configuration module for Lit-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use lit_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Max redo: {}", config.dispatch.max_redo);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    CapacityConfig, CompletionConfig, Config, DispatchConfig, OutputConfig, ProbeConfig,
    SiteConfig, UserAgentConfig, MAX_COOLDOWN_SECONDS,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
