use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Command-line values that take precedence over the configuration file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub seed_url: Option<String>,
    pub max_depth: Option<u32>,
    pub concurrency: Option<u32>,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub max_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Applies every override that was given; list values are appended
    pub fn apply(&self, config: &mut Config) {
        if let Some(seed) = &self.seed_url {
            config.crawler.seed_url = seed.clone();
        }
        if let Some(depth) = self.max_depth {
            config.crawler.max_depth = depth;
        }
        if let Some(concurrency) = self.concurrency {
            config.crawler.concurrency = concurrency;
        }
        config.scope.allow.extend(self.allow.iter().cloned());
        config.scope.deny.extend(self.deny.iter().cloned());
        if let Some(max_attempts) = self.max_attempts {
            config.retry.max_attempts = max_attempts;
        }
        if let Some(base) = self.backoff_base_ms {
            config.retry.backoff_base_ms = base;
        }
        if let Some(max) = self.backoff_max_ms {
            config.retry.backoff_max_ms = max;
        }
    }
}

/// Loads, parses and validates a configuration file
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Builds the startup configuration from an optional file plus CLI overrides
///
/// The overrides are applied before validation, so a seed given only on the
/// command line is enough to produce a valid configuration. The returned hash
/// covers the file content and the effective crawl parameters.
pub fn resolve_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<(Config, String), ConfigError> {
    let content = match path {
        Some(path) => std::fs::read_to_string(path)?,
        None => String::new(),
    };

    let mut config: Config = toml::from_str(&content)?;
    overrides.apply(&mut config);
    validate(&config)?;

    let fingerprint = format!(
        "{}\n{}|{}|{}|{:?}|{:?}",
        content,
        config.crawler.seed_url,
        config.crawler.max_depth,
        config.retry.max_attempts,
        config.scope.allow,
        config.scope.deny
    );
    Ok((config, hash_content(&fingerprint)))
}

/// Computes a SHA-256 hash of the configuration file content
///
/// This is stored on each run record to detect configuration changes between runs.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(hash_content(&content))
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
