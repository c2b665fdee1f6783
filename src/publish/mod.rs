//! Content extraction and publishing
//!
//! A page that has been fetched goes through two steps: `extract` turns raw
//! HTML into normalized content with a stable hash, and `publish` hands that
//! content to the index. Publishing the same URL again overwrites the earlier
//! document, so a redelivered job cannot produce a duplicate.
//!
//! # Components
//!
//! - `ContentPipeline`: the trait the coordinator drives
//! - `IndexingPipeline`: blob documents plus a full-text index
//! - `BlobStore`: one JSON document per canonical URL on local disk
//! - `SqliteSearchIndex`: SQLite FTS5 index with upsert-by-URL

mod blob;
mod pipeline;
mod search;

pub use blob::{BlobStore, PageDocument};
pub use pipeline::IndexingPipeline;
pub use search::{SearchHit, SqliteSearchIndex};

use crate::ErrorKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Normalized page content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub text: String,
    /// SHA-256 (hex) of title and text
    pub content_hash: String,
}

impl ExtractedContent {
    pub fn new(title: Option<String>, text: String) -> Self {
        let content_hash = content_hash(title.as_deref(), &text);
        Self {
            title,
            text,
            content_hash,
        }
    }
}

/// Facts about the crawl that travel with a published document
#[derive(Debug, Clone)]
pub struct PublishMetadata {
    pub canonical_url: String,
    pub final_url: String,
    pub depth: u32,
    pub fetched_at: DateTime<Utc>,
    pub run_id: i64,
}

/// A failed extract or publish, tagged with whether it is worth retrying
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::transient(format!("IO error: {}", e))
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::transient(format!("Index error: {}", e))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::permanent(format!("Serialization error: {}", e))
    }
}

/// Turns fetched pages into published documents
#[async_trait]
pub trait ContentPipeline: Send + Sync {
    async fn extract(&self, url: &Url, raw_html: &str) -> Result<ExtractedContent, PipelineError>;

    /// Must be idempotent per URL
    async fn publish(
        &self,
        url: &Url,
        content: &ExtractedContent,
        metadata: &PublishMetadata,
    ) -> Result<(), PipelineError>;
}

/// Hash of the content a reader would see
pub fn content_hash(title: Option<&str>, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = ExtractedContent::new(Some("Title".to_string()), "body".to_string());
        let b = ExtractedContent::new(Some("Title".to_string()), "body".to_string());
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }

    #[test]
    fn test_content_hash_separates_title_and_text() {
        assert_ne!(content_hash(Some("ab"), "c"), content_hash(Some("a"), "bc"));
        assert_ne!(content_hash(None, "x"), content_hash(Some("x"), ""));
    }
}
