//! Full-text index on SQLite FTS5

use crate::publish::PipelineError;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const INDEX_SCHEMA_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS pages_fts USING fts5(
    url UNINDEXED,
    title,
    body
);
"#;

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: Option<String>,
    pub snippet: String,
}

/// Searchable index of published pages, one row per URL
pub struct SqliteSearchIndex {
    conn: Mutex<Connection>,
}

impl SqliteSearchIndex {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.execute_batch(INDEX_SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, PipelineError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(INDEX_SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| PipelineError::transient("search index lock poisoned"))?;
        f(&mut conn)
    }

    /// Inserts or replaces the document for `url`
    pub fn upsert(&self, url: &str, title: Option<&str>, body: &str) -> Result<(), PipelineError> {
        self.with(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM pages_fts WHERE url = ?1", params![url])?;
            tx.execute(
                "INSERT INTO pages_fts (url, title, body) VALUES (?1, ?2, ?3)",
                params![url, title, body],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Best matches for a free-text query
    ///
    /// Every whitespace-separated word must appear; words are matched
    /// literally, so FTS operators in the input have no effect.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, PipelineError> {
        let match_expr = query
            .split_whitespace()
            .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" ");

        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        self.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT url, title, snippet(pages_fts, 2, '[', ']', '...', 12)
                 FROM pages_fts WHERE pages_fts MATCH ?1 ORDER BY rank LIMIT ?2",
            )?;
            let hits = stmt
                .query_map(params![match_expr, limit as i64], |row| {
                    Ok(SearchHit {
                        url: row.get(0)?,
                        title: row.get(1)?,
                        snippet: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(hits)
        })
    }

    /// Number of indexed documents
    pub fn count(&self) -> Result<u64, PipelineError> {
        self.with(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM pages_fts", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Removes every indexed document
    pub fn clear(&self) -> Result<(), PipelineError> {
        self.with(|conn| {
            conn.execute("DELETE FROM pages_fts", [])?;
            Ok(())
        })
    }
}
