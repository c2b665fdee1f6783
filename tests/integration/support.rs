//! Scripted collaborators and a crawl harness

use async_trait::async_trait;
use site_indexer::config::ScopeConfig;
use site_indexer::crawler::{
    Coordinator, CrawlSettings, FetchError, FetchedPage, Frontier, PageFetcher, RetryPolicy,
};
use site_indexer::publish::{ContentPipeline, ExtractedContent, PipelineError, PublishMetadata};
use site_indexer::queue::MemoryQueue;
use site_indexer::storage::{LedgerHandle, SqliteLedger};
use site_indexer::url::{CanonicalPolicy, ScopePolicy};
use site_indexer::{CrawlState, ErrorKind};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub const SEED: &str = "https://site.test/";

pub fn url(path: &str) -> String {
    format!("https://site.test{}", path)
}

/// A fake site: pages with links, plus scripted failures per URL
#[derive(Default)]
pub struct ScriptedFetcher {
    pages: HashMap<String, Vec<String>>,
    failures: Mutex<HashMap<String, VecDeque<FetchError>>>,
    delays: HashMap<String, Duration>,
    redirects: HashMap<String, Url>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `page` with links to `links` (absolute or relative)
    pub fn page(mut self, page: &str, links: &[&str]) -> Self {
        self.pages
            .insert(page.to_string(), links.iter().map(|l| l.to_string()).collect());
        self
    }

    /// The next `times` fetches of `page` fail with `kind`
    pub fn fail(self, page: &str, times: usize, kind: ErrorKind) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            let queue = failures.entry(page.to_string()).or_default();
            for n in 0..times {
                queue.push_back(FetchError {
                    kind,
                    message: format!("scripted failure {}", n + 1),
                    status_code: None,
                });
            }
        }
        self
    }

    /// Every fetch of `page` takes `delay`
    pub fn slow(mut self, page: &str, delay: Duration) -> Self {
        self.delays.insert(page.to_string(), delay);
        self
    }

    /// Fetching `page` lands on `target`, as after an HTTP redirect
    pub fn redirect(mut self, page: &str, target: &str) -> Self {
        self.redirects
            .insert(page.to_string(), Url::parse(target).unwrap());
        self
    }

    pub fn calls(&self, page: &str) -> u32 {
        self.calls.lock().unwrap().get(page).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchedPage, FetchError> {
        let key = url.to_string();
        *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;

        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }

        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|q| q.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }

        let links = self
            .pages
            .get(&key)
            .ok_or_else(|| FetchError::permanent(format!("HTTP 404 for {}", key)))?;

        let links = links
            .iter()
            .filter_map(|l| url.join(l).ok())
            .map(|l| l.to_string())
            .collect();

        Ok(FetchedPage {
            raw_html: format!("<html><body>{}</body></html>", key),
            final_url: self.redirects.get(&key).unwrap_or(url).clone(),
            links,
            status_code: 200,
        })
    }
}

/// Counts publishes per URL instead of indexing anything
#[derive(Default)]
pub struct RecordingPipeline {
    published: Mutex<HashMap<String, u32>>,
}

impl RecordingPipeline {
    pub fn publishes(&self, page: &str) -> u32 {
        self.published.lock().unwrap().get(page).copied().unwrap_or(0)
    }

    pub fn total_publishes(&self) -> u32 {
        self.published.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ContentPipeline for RecordingPipeline {
    async fn extract(&self, url: &Url, raw_html: &str) -> Result<ExtractedContent, PipelineError> {
        Ok(ExtractedContent::new(
            Some(url.to_string()),
            raw_html.to_string(),
        ))
    }

    async fn publish(
        &self,
        url: &Url,
        _content: &ExtractedContent,
        _metadata: &PublishMetadata,
    ) -> Result<(), PipelineError> {
        *self
            .published
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;
        Ok(())
    }
}

/// Settings scaled down so a test crawl takes milliseconds
pub fn fast_settings(max_attempts: u32) -> CrawlSettings {
    CrawlSettings {
        concurrency: 4,
        job_timeout: Duration::from_millis(500),
        lease_duration: Duration::from_secs(1),
        idle_poll: Duration::from_millis(5),
        reconcile_interval: Duration::from_millis(50),
        reconcile_grace: Duration::from_millis(100),
        retry: RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(5),
        ),
        queue_retry: RetryPolicy::new(
            u32::MAX,
            Duration::from_millis(1),
            Duration::from_millis(10),
        ),
    }
}

pub struct Harness {
    pub ledger: LedgerHandle,
    pub queue: Arc<MemoryQueue>,
    pub frontier: Arc<Frontier>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub pipeline: Arc<RecordingPipeline>,
    pub coordinator: Coordinator,
}

impl Harness {
    pub fn new(fetcher: ScriptedFetcher, max_depth: u32, settings: CrawlSettings) -> Self {
        let ledger = LedgerHandle::new(SqliteLedger::open_in_memory().unwrap());
        Self::with_ledger(ledger, fetcher, max_depth, settings)
    }

    /// A harness over an existing ledger, as after a restart
    pub fn with_ledger(
        ledger: LedgerHandle,
        fetcher: ScriptedFetcher,
        max_depth: u32,
        settings: CrawlSettings,
    ) -> Self {
        let seed = Url::parse(SEED).unwrap();
        let scope = ScopePolicy::new(&seed, &ScopeConfig::default(), max_depth).unwrap();
        let queue = Arc::new(MemoryQueue::new());
        let frontier = Arc::new(Frontier::new(
            ledger.clone(),
            queue.clone(),
            scope,
            CanonicalPolicy::default(),
            1,
        ));
        let fetcher = Arc::new(fetcher);
        let pipeline = Arc::new(RecordingPipeline::default());
        let coordinator = Coordinator::new(
            frontier.clone(),
            fetcher.clone(),
            pipeline.clone(),
            settings,
        );

        Self {
            ledger,
            queue,
            frontier,
            fetcher,
            pipeline,
            coordinator,
        }
    }

    pub fn state(&self, page: &str) -> Option<CrawlState> {
        self.ledger.get(page).unwrap().map(|r| r.state)
    }

    pub fn attempts(&self, page: &str) -> u32 {
        self.ledger.get(page).unwrap().map(|r| r.attempt_count).unwrap_or(0)
    }
}
