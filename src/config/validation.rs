use crate::config::types::{
    CapacityConfig, CompletionConfig, Config, DispatchConfig, OutputConfig, ProbeConfig, SiteConfig,
    UserAgentConfig, MAX_COOLDOWN_SECONDS,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_dispatch_config(&config.dispatch)?;
    validate_capacity_config(&config.capacity)?;
    validate_probe_config(&config.probe)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    if let Some(completion) = &config.completion {
        validate_completion_config(completion)?;
    }
    validate_sites(&config.sites)?;
    Ok(())
}

/// Validates dispatch configuration
fn validate_dispatch_config(config: &DispatchConfig) -> Result<(), ConfigError> {
    if config.max_concurrent < 1 || config.max_concurrent > 1000 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent must be between 1 and 1000, got {}",
            config.max_concurrent
        )));
    }

    if config.max_redo < 1 {
        return Err(ConfigError::Validation(format!(
            "max_redo must be >= 1, got {}",
            config.max_redo
        )));
    }

    if !config.cooldown_seconds.is_finite()
        || config.cooldown_seconds < 0.0
        || config.cooldown_seconds > MAX_COOLDOWN_SECONDS
    {
        return Err(ConfigError::Validation(format!(
            "cooldown_seconds must be between 0 and {}, got {}",
            MAX_COOLDOWN_SECONDS, config.cooldown_seconds
        )));
    }

    if config.tick_millis < 1 || config.tick_millis > 1000 {
        return Err(ConfigError::Validation(format!(
            "tick_millis must be between 1 and 1000, got {}",
            config.tick_millis
        )));
    }

    if config.request_timeout_seconds < 1 {
        return Err(ConfigError::Validation(
            "request_timeout_seconds must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "{} must be > 0, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Validates capacity configuration
fn validate_capacity_config(config: &CapacityConfig) -> Result<(), ConfigError> {
    validate_rate("requests_per_minute", config.requests_per_minute)?;
    if let Some(tokens) = config.tokens_per_minute {
        validate_rate("tokens_per_minute", tokens)?;
    }
    Ok(())
}

/// Validates probe configuration
fn validate_probe_config(config: &ProbeConfig) -> Result<(), ConfigError> {
    if config.probe_size < 1 {
        return Err(ConfigError::Validation(
            "probe_size must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("log_path", &config.log_path),
        ("escalation_path", &config.escalation_path),
        ("database_path", &config.database_path),
        ("summary_path", &config.summary_path),
        ("articles_dir", &config.articles_dir),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }

    Ok(())
}

/// Validates the completion endpoint configuration
fn validate_completion_config(config: &CompletionConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid completion endpoint: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "Completion endpoint '{}' must use http or https",
            config.endpoint
        )));
    }

    if config.api_key_env.is_empty() {
        return Err(ConfigError::Validation(
            "api_key_env cannot be empty".to_string(),
        ));
    }

    if config.timeout_seconds < 1 {
        return Err(ConfigError::Validation(
            "completion timeout_seconds must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates site entries
fn validate_sites(sites: &[SiteConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for site in sites {
        if site.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "site name cannot be empty".to_string(),
            ));
        }

        if !names.insert(site.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate site name '{}'",
                site.name
            )));
        }

        validate_domain_pattern(&site.domain)?;
        validate_rate(&format!("site '{}' requests_per_minute", site.name), site.requests_per_minute)?;

        for prefix in &site.doi_prefixes {
            if !prefix.starts_with("10.") || prefix.len() < 4 {
                return Err(ConfigError::Validation(format!(
                    "site '{}': DOI prefix '{}' must start with '10.'",
                    site.name, prefix
                )));
            }
        }

        if let Some(markers) = &site.challenge_markers {
            if markers.iter().any(|m| m.trim().is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "site '{}': challenge markers cannot be empty",
                    site.name
                )));
            }
        }

        if let Some(template) = &site.url_template {
            if !template.contains("{doi}") {
                return Err(ConfigError::Validation(format!(
                    "site '{}': url_template must contain '{{doi}}'",
                    site.name
                )));
            }
            Url::parse(&template.replace("{doi}", "10.0/x")).map_err(|e| {
                ConfigError::InvalidUrl(format!("site '{}': invalid url_template: {}", site.name, e))
            })?;
        }
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    match pattern.strip_prefix("*.") {
        Some(domain) => validate_domain_string(domain),
        None => validate_domain_string(pattern),
    }
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| ConfigError::Validation(format!("Invalid email format: '{}'", email)))?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(name: &str) -> SiteConfig {
        SiteConfig {
            name: name.to_string(),
            domain: "*.example.org".to_string(),
            doi_prefixes: vec!["10.1234".to_string()],
            requests_per_minute: 10.0,
            single_session: false,
            challenge_markers: None,
            url_template: None,
        }
    }

    #[test]
    fn test_validate_domain_pattern() {
        assert!(validate_domain_pattern("example.com").is_ok());
        assert!(validate_domain_pattern("*.example.com").is_ok());
        assert!(validate_domain_pattern("127.0.0.1").is_ok());

        assert!(validate_domain_pattern("").is_err());
        assert!(validate_domain_pattern("*.").is_err());
        assert!(validate_domain_pattern("example").is_err());
        assert!(validate_domain_pattern(".example.com").is_err());
        assert!(validate_domain_pattern("example.com.").is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@domain").is_err());
        assert!(validate_email("a@b@c.com").is_err());
    }

    #[test]
    fn test_sites_valid() {
        assert!(validate_sites(&[site("acs"), site("rsc")]).is_ok());
    }

    #[test]
    fn test_duplicate_site_names() {
        let result = validate_sites(&[site("acs"), site("acs")]);
        assert!(matches!(result, Err(ConfigError::Validation(m)) if m.contains("duplicate")));
    }

    #[test]
    fn test_site_checks() {
        let mut empty = site(" ");
        empty.name = " ".to_string();
        assert!(validate_sites(&[empty]).is_err());

        let mut bad_prefix = site("acs");
        bad_prefix.doi_prefixes = vec!["1021".to_string()];
        assert!(validate_sites(&[bad_prefix]).is_err());

        let mut bad_rate = site("acs");
        bad_rate.requests_per_minute = 0.0;
        assert!(validate_sites(&[bad_rate]).is_err());

        let mut bad_template = site("acs");
        bad_template.url_template = Some("https://example.org/article".to_string());
        assert!(validate_sites(&[bad_template]).is_err());

        let mut good_template = site("acs");
        good_template.url_template = Some("http://127.0.0.1:8080/doi/{doi}".to_string());
        assert!(validate_sites(&[good_template]).is_ok());
    }

    #[test]
    fn test_dispatch_ranges() {
        let mut config = DispatchConfig {
            max_concurrent: 16,
            max_redo: 3,
            cooldown_seconds: 15.0,
            tick_millis: 10,
            request_timeout_seconds: 30,
        };
        assert!(validate_dispatch_config(&config).is_ok());

        config.max_concurrent = 0;
        assert!(validate_dispatch_config(&config).is_err());
        config.max_concurrent = 16;

        config.cooldown_seconds = -1.0;
        assert!(validate_dispatch_config(&config).is_err());
        config.cooldown_seconds = 1e20;
        assert!(validate_dispatch_config(&config).is_err());
        config.cooldown_seconds = MAX_COOLDOWN_SECONDS;
        assert!(validate_dispatch_config(&config).is_ok());
        config.cooldown_seconds = 0.0;

        config.tick_millis = 5000;
        assert!(validate_dispatch_config(&config).is_err());
    }

    #[test]
    fn test_completion_endpoint_scheme() {
        let mut config = CompletionConfig {
            endpoint: "ftp://example.com/v1".to_string(),
            mode: Default::default(),
            api_key_env: "KEY".to_string(),
            timeout_seconds: 60,
        };
        assert!(validate_completion_config(&config).is_err());

        config.endpoint = "http://127.0.0.1:9000/v1/chat/completions".to_string();
        assert!(validate_completion_config(&config).is_ok());
    }
}
