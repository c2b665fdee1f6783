//! Crawler coordinator - worker pool and per-job orchestration
//!
//! This module runs the crawl proper:
//! - N worker tasks lease jobs from the queue and drive each URL through the
//!   state machine (claim, fetch, extract, admit links, publish, complete)
//! - a reconciliation task re-enqueues records stuck in `Discovered`
//! - completion is detected when the queue is empty and nothing unfinished
//!   remains in the ledger
//!
//! The queue may deliver a job more than once. Every delivery is checked
//! against the ledger first, so a duplicate is acked, deferred or reclaimed
//! but never processed twice.

use crate::config::Config;
use crate::crawler::fetcher::{FetchError, PageFetcher};
use crate::crawler::frontier::Frontier;
use crate::crawler::retry::RetryPolicy;
use crate::output::CrawlSummary;
use crate::publish::{ContentPipeline, PipelineError, PublishMetadata};
use crate::queue::{LeasedJob, QueueError, QueueResult, WorkQueue};
use crate::state::{CrawlEvent, CrawlState};
use crate::storage::{Ledger, LedgerHandle, StorageError, StorageResult, UrlRecord};
use crate::ErrorKind;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Timing and retry knobs of a crawl
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub concurrency: usize,
    /// Budget for one attempt, fetch through publish
    pub job_timeout: Duration,
    /// Queue visibility timeout and ledger claim length
    pub lease_duration: Duration,
    pub idle_poll: Duration,
    pub reconcile_interval: Duration,
    pub reconcile_grace: Duration,
    /// Per-URL retries
    pub retry: RetryPolicy,
    /// Backoff while the queue itself is failing
    pub queue_retry: RetryPolicy,
}

impl CrawlSettings {
    pub fn from_config(config: &Config) -> Self {
        let crawler = &config.crawler;
        Self {
            concurrency: crawler.concurrency.max(1) as usize,
            job_timeout: Duration::from_millis(crawler.job_timeout_ms),
            lease_duration: Duration::from_millis(crawler.lease_duration_ms),
            idle_poll: Duration::from_millis(crawler.idle_poll_ms),
            reconcile_interval: Duration::from_millis(crawler.reconcile_interval_ms),
            reconcile_grace: Duration::from_millis(crawler.reconcile_grace_ms),
            retry: RetryPolicy::from_config(&config.retry),
            queue_retry: RetryPolicy::for_queue(&config.retry),
        }
    }
}

/// How one delivery ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Published (or found already published) and marked `Done`
    Completed,
    /// Transient failure, released with a backoff delay
    Retrying,
    /// Out of attempts
    DeadLettered,
    /// Permanent failure
    Failed,
    /// Duplicate of finished or unknown work, acked
    Discarded,
    /// Not yet eligible or held by another worker, released
    Deferred,
    /// The ledger could not be updated; the message times out and comes back
    Aborted,
}

/// Result of checking a delivery against the ledger
#[derive(Debug, Clone, PartialEq)]
enum Claim {
    Discard,
    Defer(Duration),
    /// Published by an earlier holder that died before completing
    Finished,
    Proceed(UrlRecord),
    /// Reclaimed after the final attempt's lease ran out
    Exhausted(UrlRecord),
}

/// Decides what a delivery may do with `record` and takes the claim
///
/// Runs inside a single ledger update, so two workers holding duplicate
/// messages for the same URL can never both get `Proceed`.
fn claim(
    record: &mut UrlRecord,
    now: DateTime<Utc>,
    lease_duration: Duration,
    max_attempts: u32,
) -> StorageResult<Claim> {
    if record.state.is_terminal() {
        return Ok(Claim::Discard);
    }

    if record.lease_is_live(now) {
        let wait = record
            .lease_deadline
            .map(|deadline| until(now, deadline))
            .unwrap_or_default();
        return Ok(Claim::Defer(wait));
    }

    match record.state {
        CrawlState::Published => {
            record.apply(CrawlEvent::Completed, max_attempts)?;
            record.lease_deadline = None;
            return Ok(Claim::Finished);
        }
        CrawlState::Fetching | CrawlState::Extracted => {
            let state = record.apply(CrawlEvent::LeaseExpired, max_attempts)?;
            record.lease_deadline = None;
            if state == CrawlState::DeadLettered {
                record.last_error = Some("lease expired on final attempt".to_string());
                return Ok(Claim::Exhausted(record.clone()));
            }
            record.next_eligible_at = None;
        }
        CrawlState::Discovered => {
            record.apply(CrawlEvent::Enqueued, max_attempts)?;
        }
        _ => {}
    }

    if let Some(eligible) = record.next_eligible_at {
        if eligible > now {
            return Ok(Claim::Defer(until(now, eligible)));
        }
    }

    record.apply(CrawlEvent::Leased, max_attempts)?;
    record.lease_deadline = Some(now + chrono_duration(lease_duration));
    record.next_eligible_at = None;
    Ok(Claim::Proceed(record.clone()))
}

fn until(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (then - now).to_std().unwrap_or(Duration::ZERO)
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.as_millis().min(i64::MAX as u128) as i64)
}

/// Fails unless `current` is still the claim taken as `held`
fn ensure_held(current: &UrlRecord, held: &UrlRecord) -> StorageResult<()> {
    if current.attempt_count != held.attempt_count || !current.state.is_in_flight() {
        return Err(StorageError::Superseded(current.canonical_url.clone()));
    }
    Ok(())
}

/// Why an attempt did not finish
#[derive(Debug)]
struct AttemptError {
    kind: ErrorKind,
    message: String,
}

impl AttemptError {
    fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }
}

impl From<FetchError> for AttemptError {
    fn from(e: FetchError) -> Self {
        Self {
            kind: e.kind,
            message: format!("fetch: {}", e.message),
        }
    }
}

impl From<PipelineError> for AttemptError {
    fn from(e: PipelineError) -> Self {
        Self {
            kind: e.kind,
            message: format!("pipeline: {}", e.message),
        }
    }
}

impl From<StorageError> for AttemptError {
    fn from(e: StorageError) -> Self {
        AttemptError::transient(format!("ledger: {}", e))
    }
}

/// Main crawler coordinator structure
///
/// Cheap to clone; every worker task owns a clone.
#[derive(Clone)]
pub struct Coordinator {
    frontier: Arc<Frontier>,
    fetcher: Arc<dyn PageFetcher>,
    pipeline: Arc<dyn ContentPipeline>,
    settings: CrawlSettings,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(
        frontier: Arc<Frontier>,
        fetcher: Arc<dyn PageFetcher>,
        pipeline: Arc<dyn ContentPipeline>,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            frontier,
            fetcher,
            pipeline,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops leasing; in-flight jobs still finish
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn settings(&self) -> &CrawlSettings {
        &self.settings
    }

    fn ledger(&self) -> &LedgerHandle {
        self.frontier.ledger()
    }

    fn queue(&self) -> &Arc<dyn WorkQueue> {
        self.frontier.queue()
    }

    /// Runs workers until the crawl drains or shutdown is requested
    pub async fn run(&self) -> crate::Result<CrawlSummary> {
        tracing::info!(
            "Starting crawl run {} with {} workers",
            self.frontier.run_id(),
            self.settings.concurrency
        );
        let start_time = std::time::Instant::now();

        let reconcile_token = self.shutdown.child_token();
        let reconciler = tokio::spawn(self.clone().reconcile_loop(reconcile_token.clone()));

        let mut workers = JoinSet::new();
        for id in 0..self.settings.concurrency {
            workers.spawn(self.clone().worker(id));
        }

        let mut processed = 0usize;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(count) => processed += count,
                Err(e) => tracing::error!("Worker task failed: {}", e),
            }
        }

        reconcile_token.cancel();
        if let Err(e) = reconciler.await {
            tracing::error!("Reconciliation task failed: {}", e);
        }

        let counts = self.ledger().with(|l| l.count_by_state())?;
        let summary = CrawlSummary::from_counts(&counts);

        tracing::info!(
            "Crawl finished: {} deliveries handled in {:?}; {}",
            processed,
            start_time.elapsed(),
            summary
        );

        Ok(summary)
    }

    /// One worker: lease, process, repeat
    ///
    /// Returns the number of deliveries handled.
    async fn worker(self, id: usize) -> usize {
        let mut handled = 0usize;
        let mut queue_failures = 0u32;

        loop {
            let leased = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                leased = self.queue().lease(self.settings.lease_duration) => leased,
            };

            match leased {
                Ok(Some(job)) => {
                    queue_failures = 0;
                    let url = job.job.canonical_url.clone();
                    let outcome = self.process(job).await;
                    tracing::debug!("Worker {}: {} -> {:?}", id, url, outcome);
                    handled += 1;
                }
                Ok(None) => match self.is_drained().await {
                    Ok(true) => {
                        tracing::debug!("Worker {}: no work left", id);
                        break;
                    }
                    Ok(false) => {
                        queue_failures = 0;
                        self.pause(self.settings.idle_poll).await;
                    }
                    Err(e) => {
                        let delay = self.queue_backoff(&mut queue_failures);
                        tracing::warn!(
                            "Worker {}: completion check failed: {}; backing off {:?}",
                            id,
                            e,
                            delay
                        );
                        self.pause(delay).await;
                    }
                },
                Err(e) => {
                    let delay = self.queue_backoff(&mut queue_failures);
                    tracing::warn!("Worker {}: {}; backing off {:?}", id, e, delay);
                    self.pause(delay).await;
                }
            }
        }

        handled
    }

    /// True when the queue is empty and no unfinished record is left
    ///
    /// Unfinished records without a message are re-enqueued as a side effect.
    /// If the queue refuses any of them the check fails, so the caller backs
    /// off instead of finishing.
    async fn is_drained(&self) -> crate::Result<bool> {
        if self.queue().depth().await? > 0 {
            return Ok(false);
        }

        let resumed = self.frontier.resume().await?;
        if resumed.refused() > 0 {
            return Err(QueueError::Unavailable(format!(
                "{} unfinished URLs could not be re-enqueued",
                resumed.refused()
            ))
            .into());
        }
        Ok(resumed.pending == 0)
    }

    /// Next delay while the queue is failing; bumps the failure streak
    fn queue_backoff(&self, failures: &mut u32) -> Duration {
        let delay = self.settings.queue_retry.next_delay(*failures);
        *failures = failures.saturating_add(1);
        delay
    }

    /// Sleeps unless shutdown is requested first
    async fn pause(&self, delay: Duration) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    async fn reconcile_loop(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.reconcile_interval);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.frontier.reconcile(self.settings.reconcile_grace).await {
                tracing::warn!("Reconciliation failed: {}", e);
            }
        }
    }

    /// Handles one delivery from start to queue resolution
    pub async fn process(&self, leased: LeasedJob) -> JobOutcome {
        let url = leased.job.canonical_url.clone();
        let now = Utc::now();
        let lease_duration = self.settings.lease_duration;
        let max_attempts = self.settings.retry.max_attempts;

        let claimed = self.ledger().with(|l| {
            l.update(&url, |record| {
                claim(record, now, lease_duration, max_attempts)
            })
        });

        let claimed = match claimed {
            Ok(claimed) => claimed,
            Err(StorageError::RecordNotFound(_)) => Claim::Discard,
            Err(e) => {
                tracing::warn!("Could not claim {}: {}", url, e);
                return JobOutcome::Aborted;
            }
        };

        match claimed {
            Claim::Discard => {
                self.resolved(&url, "ack", self.queue().ack(&leased.lease).await);
                JobOutcome::Discarded
            }
            Claim::Defer(wait) => {
                let wait = wait.max(self.settings.idle_poll);
                self.resolved(
                    &url,
                    "release",
                    self.queue().release(&leased.lease, wait).await,
                );
                JobOutcome::Deferred
            }
            Claim::Finished => {
                tracing::info!("Completed {} left published by an earlier worker", url);
                self.resolved(&url, "ack", self.queue().ack(&leased.lease).await);
                JobOutcome::Completed
            }
            Claim::Exhausted(record) => {
                tracing::warn!(
                    "Dead-lettered {} after {} attempts: lease expired",
                    url,
                    record.attempt_count
                );
                let reason = record.last_error.as_deref().unwrap_or("lease expired");
                self.resolved(
                    &url,
                    "dead-letter",
                    self.queue().dead_letter(&leased.lease, reason).await,
                );
                JobOutcome::DeadLettered
            }
            Claim::Proceed(record) => self.run_attempt(&leased, record).await,
        }
    }

    async fn run_attempt(&self, leased: &LeasedJob, record: UrlRecord) -> JobOutcome {
        tracing::debug!(
            "Fetching {} (depth {}, attempt {})",
            record.canonical_url,
            record.depth,
            record.attempt_count
        );

        let attempt = tokio::time::timeout(self.settings.job_timeout, self.attempt(&record)).await;

        let result = match attempt {
            Ok(result) => result,
            Err(_) => Err(AttemptError::transient(format!(
                "timed out after {:?}",
                self.settings.job_timeout
            ))),
        };

        match result {
            Ok(hash) => self.complete(leased, &record, hash).await,
            Err(e) => self.fail(leased, &record, e).await,
        }
    }

    /// Fetch, extract, admit links and publish; returns the content hash
    async fn attempt(&self, record: &UrlRecord) -> Result<String, AttemptError> {
        let url = Url::parse(&record.canonical_url)
            .map_err(|e| AttemptError::permanent(format!("bad URL: {}", e)))?;

        let page = self.fetcher.fetch(&url, self.settings.job_timeout).await?;
        if let Err(reason) = self.frontier.check_landing(&page.final_url, record.depth) {
            return Err(AttemptError::permanent(format!(
                "redirected to {}: {}",
                page.final_url, reason
            )));
        }

        let content = self.pipeline.extract(&url, &page.raw_html).await?;

        self.ledger().with(|l| {
            l.update(&record.canonical_url, |r| {
                ensure_held(r, record)?;
                r.apply(CrawlEvent::Extracted, u32::MAX)?;
                Ok(())
            })
        })?;

        // Shortcut only; admit applies the depth limit itself.
        if record.depth < self.frontier.max_depth() {
            for link in &page.links {
                self.frontier.admit(link, record.depth).await?;
            }
        }

        if record.content_hash.as_deref() == Some(content.content_hash.as_str()) {
            tracing::debug!("Content of {} unchanged, not republishing", url);
        } else {
            let metadata = PublishMetadata {
                canonical_url: record.canonical_url.clone(),
                final_url: page.final_url.to_string(),
                depth: record.depth,
                fetched_at: Utc::now(),
                run_id: self.frontier.run_id(),
            };
            self.pipeline.publish(&url, &content, &metadata).await?;
        }

        Ok(content.content_hash)
    }

    async fn complete(&self, leased: &LeasedJob, record: &UrlRecord, hash: String) -> JobOutcome {
        let url = &record.canonical_url;

        let published = self.ledger().with(|l| {
            l.update(url, |r| {
                ensure_held(r, record)?;
                r.apply(CrawlEvent::Published, u32::MAX)?;
                r.content_hash = Some(hash);
                r.last_error = None;
                Ok(())
            })
        });

        let done = published.and_then(|_| {
            self.ledger().with(|l| {
                l.update(url, |r| {
                    r.apply(CrawlEvent::Completed, u32::MAX)?;
                    r.lease_deadline = None;
                    Ok(())
                })
            })
        });

        if let Err(e) = done {
            tracing::warn!("Could not record completion of {}: {}", url, e);
            return JobOutcome::Aborted;
        }

        tracing::info!("Indexed {} (depth {})", url, record.depth);
        self.resolved(url, "ack", self.queue().ack(&leased.lease).await);
        JobOutcome::Completed
    }

    async fn fail(
        &self,
        leased: &LeasedJob,
        record: &UrlRecord,
        error: AttemptError,
    ) -> JobOutcome {
        let url = &record.canonical_url;
        let now = Utc::now();
        let retry = &self.settings.retry;

        let event = match error.kind {
            ErrorKind::Transient => CrawlEvent::TransientFailure,
            ErrorKind::Permanent => CrawlEvent::PermanentFailure,
        };

        let settled = self.ledger().with(|l| {
            l.update(url, |r| {
                ensure_held(r, record)?;
                let state = r.apply(event, retry.max_attempts)?;
                r.last_error = Some(error.message.clone());
                r.lease_deadline = None;

                let mut delay = Duration::ZERO;
                if state == CrawlState::Queued {
                    delay = retry.next_delay(r.attempt_count.saturating_sub(1));
                    r.next_eligible_at = Some(now + chrono_duration(delay));
                }
                Ok((state, delay))
            })
        });

        match settled {
            Ok((CrawlState::Queued, delay)) => {
                tracing::warn!(
                    "Attempt {} on {} failed: {}; retrying in {:?}",
                    record.attempt_count,
                    url,
                    error.message,
                    delay
                );
                self.resolved(
                    url,
                    "release",
                    self.queue().release(&leased.lease, delay).await,
                );
                JobOutcome::Retrying
            }
            Ok((CrawlState::DeadLettered, _)) => {
                tracing::warn!(
                    "Dead-lettered {} after {} attempts: {}",
                    url,
                    record.attempt_count,
                    error.message
                );
                self.resolved(
                    url,
                    "dead-letter",
                    self.queue().dead_letter(&leased.lease, &error.message).await,
                );
                JobOutcome::DeadLettered
            }
            Ok(_) => {
                tracing::warn!("Failed {}: {}", url, error.message);
                self.resolved(url, "ack", self.queue().ack(&leased.lease).await);
                JobOutcome::Failed
            }
            Err(e) => {
                tracing::warn!("Could not record failure of {}: {}", url, e);
                JobOutcome::Aborted
            }
        }
    }

    /// Logs a failed queue resolution; the message reappears on its own
    fn resolved(&self, url: &str, operation: &str, result: QueueResult<()>) {
        match result {
            Ok(()) => {}
            Err(QueueError::LeaseLost(id)) => {
                tracing::debug!("{} of {} skipped: lease on message {} lost", operation, url, id)
            }
            Err(e) => tracing::warn!("{} of {} failed: {}", operation, url, e),
        }
    }
}
