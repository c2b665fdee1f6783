use crate::url::CanonicalPolicy;
use serde::Deserialize;

/// Main configuration structure for Site-Indexer
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub canonical: CanonicalPolicy,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// The single site to crawl, depth 0
    #[serde(rename = "seed-url")]
    pub seed_url: String,

    /// Maximum link distance from the seed
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Number of concurrent workers
    pub concurrency: u32,

    /// Wall-clock budget for one fetch+extract attempt (milliseconds)
    #[serde(rename = "job-timeout-ms")]
    pub job_timeout_ms: u64,

    /// Queue visibility timeout and ledger claim length (milliseconds)
    #[serde(rename = "lease-duration-ms")]
    pub lease_duration_ms: u64,

    /// Sleep between lease attempts when the queue has nothing visible (milliseconds)
    #[serde(rename = "idle-poll-ms")]
    pub idle_poll_ms: u64,

    /// Period of the reconciliation sweep (milliseconds)
    #[serde(rename = "reconcile-interval-ms")]
    pub reconcile_interval_ms: u64,

    /// How long a record may sit in Discovered before being re-enqueued (milliseconds)
    #[serde(rename = "reconcile-grace-ms")]
    pub reconcile_grace_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            seed_url: String::new(),
            max_depth: 2,
            concurrency: 4,
            job_timeout_ms: 30_000,
            lease_duration_ms: 60_000,
            idle_poll_ms: 250,
            reconcile_interval_ms: 30_000,
            reconcile_grace_ms: 60_000,
        }
    }
}

/// Which discovered URLs may become jobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Only admit URLs with the seed's scheme, host and port
    #[serde(rename = "same-origin")]
    pub same_origin: bool,

    /// Path regexes; when non-empty a URL must match at least one
    pub allow: Vec<String>,

    /// Path regexes; a match rejects the URL
    pub deny: Vec<String>,

    /// Check robots.txt of the seed origin for the crawler's user agent
    #[serde(rename = "respect-robots")]
    pub respect_robots: bool,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            same_origin: true,
            allow: Vec::new(),
            deny: Vec::new(),
            respect_robots: true,
        }
    }
}

/// Retry and backoff parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Fetch attempts per URL before it is dead-lettered
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Base delay of the exponential backoff (milliseconds)
    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,

    /// Upper bound of any backoff delay (milliseconds)
    #[serde(rename = "backoff-max-ms")]
    pub backoff_max_ms: u64,

    /// Base delay when the queue itself is unavailable (milliseconds)
    #[serde(rename = "queue-backoff-base-ms")]
    pub queue_backoff_base_ms: u64,

    /// Upper bound of the queue backoff (milliseconds)
    #[serde(rename = "queue-backoff-max-ms")]
    pub queue_backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            queue_backoff_base_ms: 200,
            queue_backoff_max_ms: 5_000,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "site-indexer".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.com/bot".to_string(),
        }
    }
}

impl UserAgentConfig {
    /// Formats the `User-Agent` header value: `Name/Version (+ContactURL)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{})",
            self.crawler_name, self.crawler_version, self.contact_url
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Path to the SQLite ledger
    #[serde(rename = "ledger-path")]
    pub ledger_path: String,

    /// Path to the SQLite work queue
    #[serde(rename = "queue-path")]
    pub queue_path: String,

    /// Directory holding published page documents
    #[serde(rename = "blob-path")]
    pub blob_path: String,

    /// Path to the SQLite full-text index
    #[serde(rename = "index-path")]
    pub index_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            ledger_path: "./site-index/ledger.db".to_string(),
            queue_path: "./site-index/queue.db".to_string(),
            blob_path: "./site-index/blobs".to_string(),
            index_path: "./site-index/search.db".to_string(),
        }
    }
}

/// End-of-run reporting
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Dead-lettered URLs tolerated before the process exits non-zero
    #[serde(rename = "dead-letter-threshold")]
    pub dead_letter_threshold: u64,
}
