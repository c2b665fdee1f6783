//! Admission control in front of the work queue
//!
//! Every URL that may become a job goes through [`Frontier::admit`]. The
//! ledger's insert-if-absent is the dedup point: whoever creates the record
//! pushes the job, everybody else gets [`Admission::Duplicate`].

use crate::queue::{CrawlJob, WorkQueue};
use crate::state::{CrawlEvent, CrawlState};
use crate::storage::{Ledger, LedgerHandle, StorageResult, UrlRecord};
use crate::url::{canonicalize, CanonicalPolicy, ScopePolicy, ScopeViolation};
use crate::{ConfigError, IndexerError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Why a link never became a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Could not be canonicalized
    Invalid(String),
    OutOfScope(ScopeViolation),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Invalid(e) => write!(f, "invalid URL: {}", e),
            RejectReason::OutOfScope(violation) => write!(f, "{}", violation),
        }
    }
}

/// What happened to an admitted URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// New record, job pushed, record `Queued`
    Enqueued,
    /// Already known to the ledger; nothing pushed
    Duplicate,
    Rejected(RejectReason),
    /// New record, but the push failed; stays `Discovered` until reconciled
    Deferred,
}

/// Result of a [`Frontier::resume`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resumption {
    /// Non-terminal records found in the ledger
    pub pending: usize,
    /// Jobs the queue accepted
    pub pushed: usize,
}

impl Resumption {
    /// Records the queue refused; they stay unfinished
    pub fn refused(&self) -> usize {
        self.pending - self.pushed
    }
}

pub struct Frontier {
    ledger: LedgerHandle,
    queue: Arc<dyn WorkQueue>,
    scope: ScopePolicy,
    canonical: CanonicalPolicy,
    run_id: i64,
}

impl Frontier {
    pub fn new(
        ledger: LedgerHandle,
        queue: Arc<dyn WorkQueue>,
        scope: ScopePolicy,
        canonical: CanonicalPolicy,
        run_id: i64,
    ) -> Self {
        Self {
            ledger,
            queue,
            scope,
            canonical,
            run_id,
        }
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn max_depth(&self) -> u32 {
        self.scope.max_depth()
    }

    /// Admits a link found on a page at `referrer_depth`
    ///
    /// Invalid and out-of-scope links are rejected without an error; only a
    /// ledger failure is reported as `Err`.
    pub async fn admit(&self, raw: &str, referrer_depth: u32) -> StorageResult<Admission> {
        let depth = referrer_depth.saturating_add(1);

        let url = match canonicalize(raw, &self.canonical) {
            Ok(url) => url,
            Err(e) => {
                tracing::trace!("Rejected {}: {}", raw, e);
                return Ok(Admission::Rejected(RejectReason::Invalid(e.to_string())));
            }
        };

        if let Err(violation) = self.scope.check(&url, depth) {
            tracing::trace!("Rejected {}: {}", url, violation);
            return Ok(Admission::Rejected(RejectReason::OutOfScope(violation)));
        }

        self.insert_and_push(url.as_str(), depth).await
    }

    /// Checks where a fetch of a depth-`depth` URL actually landed
    ///
    /// A redirect may leave the crawl's scope. The landing URL is held to the
    /// same rules as a link found at that depth.
    pub fn check_landing(&self, final_url: &Url, depth: u32) -> Result<(), RejectReason> {
        let url = canonicalize(final_url.as_str(), &self.canonical)
            .map_err(|e| RejectReason::Invalid(e.to_string()))?;
        self.scope
            .check(&url, depth)
            .map_err(RejectReason::OutOfScope)
    }

    /// Admits the seed at depth 0
    ///
    /// Unlike links, a seed that cannot be crawled is a fatal configuration
    /// error. An already known seed (a resumed run) is a `Duplicate`.
    pub async fn admit_seed(&self, raw: &str) -> crate::Result<Admission> {
        let url = canonicalize(raw, &self.canonical)?;

        self.scope.check(&url, 0).map_err(|violation| {
            IndexerError::Config(ConfigError::InvalidUrl(format!(
                "Seed {} is out of scope: {}",
                url, violation
            )))
        })?;

        Ok(self.insert_and_push(url.as_str(), 0).await?)
    }

    async fn insert_and_push(&self, canonical_url: &str, depth: u32) -> StorageResult<Admission> {
        let record = UrlRecord::discovered(canonical_url, depth, self.run_id);
        let inserted = self.ledger.with(|l| l.insert_if_absent(&record))?;

        if !inserted {
            return Ok(Admission::Duplicate);
        }

        tracing::debug!("Discovered {} at depth {}", canonical_url, depth);

        if self.push(&record).await? {
            Ok(Admission::Enqueued)
        } else {
            Ok(Admission::Deferred)
        }
    }

    /// Pushes a job for `record`, then marks it `Queued` if it was `Discovered`
    ///
    /// Returns false when the queue refused the job.
    async fn push(&self, record: &UrlRecord) -> StorageResult<bool> {
        let job = CrawlJob::new(
            record.canonical_url.as_str(),
            record.depth,
            record.attempt_count,
        );

        if let Err(e) = self.queue.enqueue(&job).await {
            tracing::warn!(
                "Could not enqueue {}: {}; left for reconciliation",
                record.canonical_url,
                e
            );
            return Ok(false);
        }

        // Enqueued carries no attempt guard.
        self.ledger.with(|l| {
            l.update(&record.canonical_url, |r| {
                if r.state == CrawlState::Discovered {
                    r.apply(CrawlEvent::Enqueued, u32::MAX)?;
                }
                Ok(())
            })
        })?;

        Ok(true)
    }

    /// Re-pushes records that have sat in `Discovered` for at least `grace`
    ///
    /// Returns the number of jobs pushed.
    pub async fn reconcile(&self, grace: Duration) -> StorageResult<usize> {
        let grace = match chrono::Duration::from_std(grace) {
            Ok(grace) => grace,
            Err(_) => return Ok(0),
        };

        let stale = self
            .ledger
            .with(|l| l.stale_discovered(Utc::now() - grace))?;

        let mut pushed = 0;
        for record in &stale {
            if self.push(record).await? {
                pushed += 1;
            }
        }

        if pushed > 0 {
            tracing::info!("Reconciliation re-enqueued {} stuck URLs", pushed);
        }
        Ok(pushed)
    }

    /// Pushes a job for every non-terminal record
    ///
    /// Used when a run restarts and whenever the queue drains. Records that
    /// already have a live message get a duplicate, which the coordinator
    /// absorbs. A refused push is counted, not raised.
    pub async fn resume(&self) -> StorageResult<Resumption> {
        let pending = self.ledger.with(|l| l.non_terminal())?;

        let mut resumed = Resumption {
            pending: pending.len(),
            pushed: 0,
        };
        for record in &pending {
            if self.push(record).await? {
                resumed.pushed += 1;
            }
        }

        if resumed.pushed > 0 {
            tracing::info!("Re-enqueued {} unfinished URLs", resumed.pushed);
        }
        Ok(resumed)
    }
}
