//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Ledger trait.

use crate::state::CrawlState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Ledger, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus, UrlRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const RECORD_COLUMNS: &str = "canonical_url, depth, state, attempt_count, next_eligible_at,
     lease_deadline, content_hash, last_error, discovered_at, updated_at, discovered_run";

/// SQLite ledger backend
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    /// Opens (or creates) the ledger at `path`
    ///
    /// Several processes may share the file: WAL mode lets readers proceed
    /// during a write and the busy timeout makes writers wait their turn.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        conn.busy_timeout(Duration::from_secs(10))?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory ledger (for tests)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn query_records<P: rusqlite::Params>(
        &self,
        filter: &str,
        params: P,
    ) -> StorageResult<Vec<UrlRecord>> {
        let sql = format!(
            "SELECT {} FROM url_records {} ORDER BY discovered_at, canonical_url",
            RECORD_COLUMNS, filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params, row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get(0)?,
            started_at: row.get(1)?,
            finished_at: row.get(2)?,
            config_hash: row.get(3)?,
            status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                .unwrap_or(RunStatus::Running),
        })
    }
}

impl Ledger for SqliteLedger {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![
                format_timestamp(&Utc::now()),
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                Self::row_to_run,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                Self::row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?1 WHERE id = ?2",
            params![status.to_db_string(), run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn complete_run(&mut self, run_id: i64) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![
                RunStatus::Completed.to_db_string(),
                format_timestamp(&Utc::now()),
                run_id
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== URL Records =====

    fn insert_if_absent(&mut self, record: &UrlRecord) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO url_records ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                RECORD_COLUMNS
            ),
            params![
                record.canonical_url,
                record.depth,
                record.state.to_db_string(),
                record.attempt_count,
                record.next_eligible_at.as_ref().map(format_timestamp),
                record.lease_deadline.as_ref().map(format_timestamp),
                record.content_hash,
                record.last_error,
                format_timestamp(&record.discovered_at),
                format_timestamp(&record.updated_at),
                record.discovered_run,
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get(&self, canonical_url: &str) -> StorageResult<Option<UrlRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM url_records WHERE canonical_url = ?1",
                    RECORD_COLUMNS
                ),
                params![canonical_url],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn update<T, F>(&mut self, canonical_url: &str, mutator: F) -> StorageResult<T>
    where
        F: FnOnce(&mut UrlRecord) -> StorageResult<T>,
    {
        // IMMEDIATE takes the write lock up front, so no other writer can slip
        // in between our read and our write.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = tx
            .query_row(
                &format!(
                    "SELECT {} FROM url_records WHERE canonical_url = ?1",
                    RECORD_COLUMNS
                ),
                params![canonical_url],
                row_to_record,
            )
            .optional()?
            .ok_or_else(|| StorageError::RecordNotFound(canonical_url.to_string()))?;

        let mut record = current.clone();
        let output = mutator(&mut record)?;

        if record != current {
            record.updated_at = Utc::now();
            tx.execute(
                "UPDATE url_records SET state = ?1, attempt_count = ?2, next_eligible_at = ?3,
                 lease_deadline = ?4, content_hash = ?5, last_error = ?6, updated_at = ?7
                 WHERE canonical_url = ?8",
                params![
                    record.state.to_db_string(),
                    record.attempt_count,
                    record.next_eligible_at.as_ref().map(format_timestamp),
                    record.lease_deadline.as_ref().map(format_timestamp),
                    record.content_hash,
                    record.last_error,
                    format_timestamp(&record.updated_at),
                    canonical_url,
                ],
            )?;
        }

        tx.commit()?;
        Ok(output)
    }

    fn records_in_state(&self, state: CrawlState) -> StorageResult<Vec<UrlRecord>> {
        self.query_records("WHERE state = ?1", params![state.to_db_string()])
    }

    fn stale_discovered(&self, before: DateTime<Utc>) -> StorageResult<Vec<UrlRecord>> {
        self.query_records(
            "WHERE state = ?1 AND updated_at <= ?2",
            params![
                CrawlState::Discovered.to_db_string(),
                format_timestamp(&before)
            ],
        )
    }

    fn non_terminal(&self) -> StorageResult<Vec<UrlRecord>> {
        self.query_records(
            "WHERE state NOT IN (?1, ?2, ?3)",
            params![
                CrawlState::Done.to_db_string(),
                CrawlState::Failed.to_db_string(),
                CrawlState::DeadLettered.to_db_string(),
            ],
        )
    }

    fn clear_records(&mut self) -> StorageResult<u64> {
        let deleted = self.conn.execute("DELETE FROM url_records", [])?;
        Ok(deleted as u64)
    }

    // ===== Statistics =====

    fn count_by_state(&self) -> StorageResult<HashMap<CrawlState, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM url_records GROUP BY state")?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (state_str, count) = row?;
            let state = CrawlState::from_db_string(&state_str).ok_or_else(|| {
                StorageError::Database(format!("unknown state in ledger: {}", state_str))
            })?;
            counts.insert(state, count as u64);
        }

        Ok(counts)
    }

    fn count_total(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM url_records", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// RFC 3339 with millisecond precision and a `Z` suffix, so that text order
/// is time order
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional_timestamp(
    idx: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(idx, v)).transpose()
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<UrlRecord> {
    let state_str: String = row.get(2)?;
    let state = CrawlState::from_db_string(&state_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown crawl state '{}'", state_str).into(),
        )
    })?;

    Ok(UrlRecord {
        canonical_url: row.get(0)?,
        depth: row.get(1)?,
        state,
        attempt_count: row.get(3)?,
        next_eligible_at: parse_optional_timestamp(4, row.get(4)?)?,
        lease_deadline: parse_optional_timestamp(5, row.get(5)?)?,
        content_hash: row.get(6)?,
        last_error: row.get(7)?,
        discovered_at: parse_timestamp(8, row.get(8)?)?,
        updated_at: parse_timestamp(9, row.get(9)?)?,
        discovered_run: row.get(10)?,
    })
}
