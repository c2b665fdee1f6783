//! Durable queue backend on SQLite
//!
//! Messages carry a visibility time, a lease token and a dequeue count.
//! Claiming a message is an optimistic update guarded by the dequeue count it
//! was read with, so two processes sharing the file never hold the same
//! message at once.

use crate::queue::{
    new_lease_token, CrawlJob, DeadLetter, LeaseHandle, LeasedJob, QueueError, QueueResult,
    WorkQueue,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

const QUEUE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS queue_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    visible_at INTEGER NOT NULL,
    lease_token TEXT,
    dequeue_count INTEGER NOT NULL DEFAULT 0,
    enqueued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queue_messages_visible ON queue_messages(visible_at);

CREATE TABLE IF NOT EXISTS dead_letters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL,
    payload TEXT NOT NULL,
    reason TEXT NOT NULL,
    dequeue_count INTEGER NOT NULL,
    dead_lettered_at TEXT NOT NULL
);
"#;

/// How many times `lease` retries after losing a claim race
const CLAIM_ATTEMPTS: usize = 5;

/// SQLite-backed work queue
pub struct SqliteQueue {
    conn: Mutex<Connection>,
}

impl SqliteQueue {
    /// Opens (or creates) the queue at `path`
    pub fn open(path: &Path) -> QueueResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.execute_batch(QUEUE_SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory queue (for tests)
    pub fn open_in_memory() -> QueueResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(QUEUE_SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Drops every message and dead letter
    pub fn purge(&self) -> QueueResult<()> {
        self.with(|conn| {
            conn.execute_batch("DELETE FROM queue_messages; DELETE FROM dead_letters;")?;
            Ok(())
        })
    }

    fn with<T>(&self, f: impl FnOnce(&mut Connection) -> QueueResult<T>) -> QueueResult<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".to_string()))?;
        f(&mut conn)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Copies a message into the dead-letter table and deletes it
fn bury(
    tx: &Transaction<'_>,
    message_id: i64,
    payload: &str,
    reason: &str,
    dequeue_count: u32,
) -> QueueResult<()> {
    tx.execute(
        "INSERT INTO dead_letters
         (message_id, payload, reason, dequeue_count, dead_lettered_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            message_id,
            payload,
            reason,
            dequeue_count,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        ],
    )?;
    tx.execute(
        "DELETE FROM queue_messages WHERE id = ?1",
        params![message_id],
    )?;
    Ok(())
}

#[async_trait]
impl WorkQueue for SqliteQueue {
    async fn enqueue(&self, job: &CrawlJob) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;
        self.with(|conn| {
            conn.execute(
                "INSERT INTO queue_messages (payload, visible_at, enqueued_at) VALUES (?1, ?2, ?3)",
                params![
                    payload,
                    now_millis(),
                    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
                ],
            )?;
            Ok(())
        })
    }

    async fn lease(&self, visibility: Duration) -> QueueResult<Option<LeasedJob>> {
        self.with(|conn| {
            for _ in 0..CLAIM_ATTEMPTS {
                let now = now_millis();
                let candidate: Option<(i64, String, u32)> = conn
                    .query_row(
                        "SELECT id, payload, dequeue_count FROM queue_messages
                         WHERE visible_at <= ?1 ORDER BY visible_at, id LIMIT 1",
                        params![now],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;

                let Some((id, payload, dequeue_count)) = candidate else {
                    return Ok(None);
                };

                // An undecodable payload is dead-lettered, never claimed.
                let job: CrawlJob = match serde_json::from_str(&payload) {
                    Ok(job) => job,
                    Err(e) => {
                        let tx = conn.transaction()?;
                        let still_there: Option<u32> = tx
                            .query_row(
                                "SELECT dequeue_count FROM queue_messages
                                 WHERE id = ?1 AND dequeue_count = ?2",
                                params![id, dequeue_count],
                                |row| row.get(0),
                            )
                            .optional()?;
                        if still_there.is_some() {
                            warn!("Dead-lettering undecodable queue message {}: {}", id, e);
                            let reason = format!("malformed payload: {}", e);
                            bury(&tx, id, &payload, &reason, dequeue_count)?;
                            tx.commit()?;
                        }
                        continue;
                    }
                };

                let token = new_lease_token();
                let claimed = conn.execute(
                    "UPDATE queue_messages
                     SET visible_at = ?1, lease_token = ?2, dequeue_count = dequeue_count + 1
                     WHERE id = ?3 AND dequeue_count = ?4",
                    params![now.saturating_add(millis(visibility)), token, id, dequeue_count],
                )?;

                if claimed == 1 {
                    return Ok(Some(LeasedJob {
                        job,
                        lease: LeaseHandle {
                            message_id: id,
                            token,
                        },
                        dequeue_count: dequeue_count + 1,
                    }));
                }

                debug!("Lost claim race for queue message {}, retrying", id);
            }

            Ok(None)
        })
    }

    async fn ack(&self, lease: &LeaseHandle) -> QueueResult<()> {
        self.with(|conn| {
            let deleted = conn.execute(
                "DELETE FROM queue_messages WHERE id = ?1 AND lease_token = ?2",
                params![lease.message_id, lease.token],
            )?;
            if deleted == 0 {
                return Err(QueueError::LeaseLost(lease.message_id));
            }
            Ok(())
        })
    }

    async fn release(&self, lease: &LeaseHandle, delay: Duration) -> QueueResult<()> {
        self.with(|conn| {
            let updated = conn.execute(
                "UPDATE queue_messages SET visible_at = ?1, lease_token = NULL
                 WHERE id = ?2 AND lease_token = ?3",
                params![
                    now_millis().saturating_add(millis(delay)),
                    lease.message_id,
                    lease.token
                ],
            )?;
            if updated == 0 {
                return Err(QueueError::LeaseLost(lease.message_id));
            }
            Ok(())
        })
    }

    async fn dead_letter(&self, lease: &LeaseHandle, reason: &str) -> QueueResult<()> {
        self.with(|conn| {
            let tx = conn.transaction()?;

            let held: Option<(String, u32)> = tx
                .query_row(
                    "SELECT payload, dequeue_count FROM queue_messages
                     WHERE id = ?1 AND lease_token = ?2",
                    params![lease.message_id, lease.token],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((payload, dequeue_count)) = held else {
                return Err(QueueError::LeaseLost(lease.message_id));
            };

            bury(&tx, lease.message_id, &payload, reason, dequeue_count)?;
            tx.commit()?;
            Ok(())
        })
    }

    async fn depth(&self) -> QueueResult<u64> {
        self.with(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM queue_messages", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    async fn dead_letters(&self) -> QueueResult<Vec<DeadLetter>> {
        self.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT payload, reason, dequeue_count, dead_lettered_at
                 FROM dead_letters ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut dead = Vec::with_capacity(rows.len());
            for (payload, reason, dequeue_count, at) in rows {
                // undecodable messages have no job to report
                let Ok(job) = serde_json::from_str(&payload) else {
                    debug!("Skipping dead letter with malformed payload: {}", reason);
                    continue;
                };
                let dead_lettered_at = DateTime::parse_from_rfc3339(&at)
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|e| QueueError::Unavailable(format!("bad timestamp: {}", e)))?;
                dead.push(DeadLetter {
                    job,
                    reason,
                    dequeue_count,
                    dead_lettered_at,
                });
            }
            Ok(dead)
        })
    }
}
