//! Work queue module
//!
//! The queue carries crawl jobs between the frontier and the workers. It only
//! promises at-least-once delivery: a leased job that is neither acked,
//! released nor dead-lettered before its visibility timeout becomes visible
//! again. Duplicates are expected and absorbed by the ledger.
//!
//! # Components
//!
//! - `WorkQueue`: the trait every backend implements
//! - `MemoryQueue`: in-process queue, used by tests and single-shot crawls
//! - `SqliteQueue`: durable queue that survives restarts

mod memory;
mod sqlite;

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// One unit of crawl work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlJob {
    pub canonical_url: String,
    pub depth: u32,
    /// Attempts recorded when the job was created; the ledger's count wins
    pub attempt_count: u32,
}

impl CrawlJob {
    pub fn new(canonical_url: impl Into<String>, depth: u32, attempt_count: u32) -> Self {
        Self {
            canonical_url: canonical_url.into(),
            depth,
            attempt_count,
        }
    }
}

/// Proof of holding a message; required to resolve it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseHandle {
    pub message_id: i64,
    pub token: String,
}

/// A job handed out by [`WorkQueue::lease`]
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job: CrawlJob,
    pub lease: LeaseHandle,
    /// How many times this message has been leased, this one included
    pub dequeue_count: u32,
}

/// A message removed from circulation
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job: CrawlJob,
    pub reason: String,
    pub dequeue_count: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Errors raised by queue backends
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Lease lost for message {0}")]
    LeaseLost(i64),

    #[error("Malformed job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Unavailable(e.to_string())
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// At-least-once job queue with visibility timeouts
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Adds a job, visible immediately
    async fn enqueue(&self, job: &CrawlJob) -> QueueResult<()>;

    /// Takes the oldest visible job and hides it for `visibility`
    async fn lease(&self, visibility: Duration) -> QueueResult<Option<LeasedJob>>;

    /// Removes a leased job for good
    async fn ack(&self, lease: &LeaseHandle) -> QueueResult<()>;

    /// Gives a leased job back, visible again after `delay`
    async fn release(&self, lease: &LeaseHandle, delay: Duration) -> QueueResult<()>;

    /// Moves a leased job to the dead-letter store
    async fn dead_letter(&self, lease: &LeaseHandle, reason: &str) -> QueueResult<()>;

    /// Messages present, visible or not
    async fn depth(&self) -> QueueResult<u64>;

    /// Everything in the dead-letter store, oldest first
    async fn dead_letters(&self) -> QueueResult<Vec<DeadLetter>>;
}

/// Random token identifying one lease of a message
fn new_lease_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}
