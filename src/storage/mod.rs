//! Storage module for persisting crawl state
//!
//! This module handles the crawl ledger, the single source of truth for
//! which URLs exist and where each one is in its lifecycle:
//! - SQLite database initialization and schema management
//! - Insert-once URL records and atomic state updates
//! - Run tracking and resumption support

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteLedger;
pub use traits::{Ledger, StorageError, StorageResult};

use crate::state::{CrawlEvent, CrawlState, TransitionError};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Initializes or opens a ledger database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_ledger(path: &Path) -> StorageResult<SqliteLedger> {
    SqliteLedger::open(path)
}

/// The ledger's view of one canonical URL
#[derive(Debug, Clone, PartialEq)]
pub struct UrlRecord {
    pub canonical_url: String,
    /// Link distance from the seed; fixed at first discovery
    pub depth: u32,
    pub state: CrawlState,
    /// Number of leases taken so far
    pub attempt_count: u32,
    /// Earliest time a retried job may run again
    pub next_eligible_at: Option<DateTime<Utc>>,
    /// When the current holder's claim runs out
    pub lease_deadline: Option<DateTime<Utc>>,
    /// SHA-256 of the last published content
    pub content_hash: Option<String>,
    pub last_error: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub discovered_run: i64,
}

impl UrlRecord {
    /// A freshly discovered URL
    pub fn discovered(canonical_url: &str, depth: u32, run_id: i64) -> Self {
        let now = Utc::now();
        Self {
            canonical_url: canonical_url.to_string(),
            depth,
            state: CrawlState::Discovered,
            attempt_count: 0,
            next_eligible_at: None,
            lease_deadline: None,
            content_hash: None,
            last_error: None,
            discovered_at: now,
            updated_at: now,
            discovered_run: run_id,
        }
    }

    /// Applies an event through the transition table
    ///
    /// `Leased` counts as a new attempt. On error the record is unchanged.
    pub fn apply(
        &mut self,
        event: CrawlEvent,
        max_attempts: u32,
    ) -> Result<CrawlState, TransitionError> {
        let attempts = if event == CrawlEvent::Leased {
            self.attempt_count + 1
        } else {
            self.attempt_count
        };

        let next = self.state.next(event, attempts, max_attempts)?;
        self.attempt_count = attempts;
        self.state = next;
        Ok(next)
    }

    /// True while a worker's claim on this URL has not run out
    pub fn lease_is_live(&self, now: DateTime<Utc>) -> bool {
        self.state.is_in_flight() && self.lease_deadline.map(|d| d > now).unwrap_or(false)
    }
}

/// Shared, thread-safe access to the ledger
///
/// The lock is only held for the duration of one synchronous closure, so it
/// is never held across an `.await`.
#[derive(Clone)]
pub struct LedgerHandle {
    inner: Arc<Mutex<SqliteLedger>>,
}

impl LedgerHandle {
    pub fn new(ledger: SqliteLedger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    /// Runs `f` with exclusive access to the ledger
    pub fn with<T>(
        &self,
        f: impl FnOnce(&mut SqliteLedger) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut ledger = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
        f(&mut ledger)
    }

    pub fn get(&self, canonical_url: &str) -> StorageResult<Option<UrlRecord>> {
        self.with(|ledger| ledger.get(canonical_url))
    }
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
