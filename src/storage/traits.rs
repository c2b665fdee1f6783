//! Storage traits and error types
//!
//! This module defines the ledger interface and its error type.

use crate::state::{CrawlState, TransitionError};
use crate::storage::{RunRecord, RunStatus, UrlRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("URL record not found: {0}")]
    RecordNotFound(String),

    #[error("Claim on {0} was taken over by another worker")]
    Superseded(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Ledger lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// The durable record of every URL the crawl has seen
///
/// Implementations must make `insert_if_absent` and `update` atomic with
/// respect to every other writer of the same store, including other processes.
pub trait Ledger {
    // ===== Run Management =====

    /// Creates a new crawl run and returns its ID
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Marks a run as completed with a finish timestamp
    fn complete_run(&mut self, run_id: i64) -> StorageResult<()>;

    // ===== URL Records =====

    /// Inserts the record unless its URL is already present
    ///
    /// Returns true if this call created the record. Existing records are
    /// never modified, so the first recorded depth wins.
    fn insert_if_absent(&mut self, record: &UrlRecord) -> StorageResult<bool>;

    /// Gets the record for a canonical URL
    fn get(&self, canonical_url: &str) -> StorageResult<Option<UrlRecord>>;

    /// Atomic read-modify-write of one record
    ///
    /// The mutator runs inside a write transaction. If it returns an error,
    /// nothing is written. `updated_at` is refreshed when the record changed.
    fn update<T, F>(&mut self, canonical_url: &str, mutator: F) -> StorageResult<T>
    where
        F: FnOnce(&mut UrlRecord) -> StorageResult<T>;

    /// Gets all records in a specific state
    fn records_in_state(&self, state: CrawlState) -> StorageResult<Vec<UrlRecord>>;

    /// Records still `Discovered` whose last change is at or before `before`
    fn stale_discovered(&self, before: DateTime<Utc>) -> StorageResult<Vec<UrlRecord>>;

    /// All records that are not in a terminal state
    fn non_terminal(&self) -> StorageResult<Vec<UrlRecord>>;

    /// Deletes every URL record (runs are kept)
    fn clear_records(&mut self) -> StorageResult<u64>;

    // ===== Statistics =====

    /// Counts records per state; states without records are absent
    fn count_by_state(&self) -> StorageResult<HashMap<CrawlState, u64>>;

    /// Gets total record count
    fn count_total(&self) -> StorageResult<u64>;
}
