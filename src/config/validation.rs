use crate::config::types::{
    Config, CrawlerConfig, OutputConfig, RetryConfig, ScopeConfig, UserAgentConfig,
};
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_seed(&config.crawler.seed_url)?;
    validate_crawler_config(&config.crawler)?;
    validate_scope_config(&config.scope)?;
    validate_retry_config(&config.retry)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// The seed must be an absolute http(s) URL with a host
fn validate_seed(seed: &str) -> Result<(), ConfigError> {
    if seed.is_empty() {
        return Err(ConfigError::InvalidUrl(
            "seed-url is required (config file or --seed)".to_string(),
        ));
    }

    let url = Url::parse(seed)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "Seed URL '{}' must use http or https",
            seed
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "Seed URL '{}' has no host",
            seed
        )));
    }

    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 256, got {}",
            config.concurrency
        )));
    }

    if config.job_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "job-timeout-ms must be > 0".to_string(),
        ));
    }

    // An expired claim in the ledger must mean its holder is gone.
    if config.job_timeout_ms >= config.lease_duration_ms {
        return Err(ConfigError::Validation(format!(
            "job-timeout-ms ({}) must be smaller than lease-duration-ms ({})",
            config.job_timeout_ms, config.lease_duration_ms
        )));
    }

    if config.idle_poll_ms == 0 || config.reconcile_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "idle-poll-ms and reconcile-interval-ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_scope_config(config: &ScopeConfig) -> Result<(), ConfigError> {
    for pattern in config.allow.iter().chain(config.deny.iter()) {
        Regex::new(pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("'{}' is not a valid regex: {}", pattern, e))
        })?;
    }
    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.backoff_base_ms < 1 || config.backoff_max_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff must satisfy 1 <= base ({}) <= max ({})",
            config.backoff_base_ms, config.backoff_max_ms
        )));
    }

    if config.queue_backoff_base_ms < 1
        || config.queue_backoff_max_ms < config.queue_backoff_base_ms
    {
        return Err(ConfigError::Validation(format!(
            "queue backoff must satisfy 1 <= base ({}) <= max ({})",
            config.queue_backoff_base_ms, config.queue_backoff_max_ms
        )));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("ledger-path", &config.ledger_path),
        ("queue-path", &config.queue_path),
        ("blob-path", &config.blob_path),
        ("index-path", &config.index_path),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }
    Ok(())
}
