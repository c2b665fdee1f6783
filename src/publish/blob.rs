//! Local-disk document store

use crate::publish::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// The document written for each published page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDocument {
    pub url: String,
    pub final_url: String,
    pub title: Option<String>,
    pub text: String,
    pub content_hash: String,
    pub depth: u32,
    pub fetched_at: DateTime<Utc>,
    pub run_id: i64,
}

/// Stores one file per key under a root directory
///
/// Writes go to a temporary file that is renamed over the target, so a reader
/// never sees a partial document and rewriting a key simply replaces it.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Blob name for a canonical URL: `ab/abcdef....json`
    pub fn key_for_url(url: &str) -> String {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        format!("{}/{}.json", &digest[..2], digest)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Writes `data` under `key`, replacing any previous content
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<(), PipelineError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Wrote blob {} ({} bytes)", key, data.len());
        Ok(())
    }

    /// Reads the blob under `key`, if present
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        match fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores the document for its URL
    pub async fn put_document(&self, document: &PageDocument) -> Result<(), PipelineError> {
        let data = serde_json::to_vec_pretty(document)?;
        self.put(&Self::key_for_url(&document.url), &data).await
    }

    /// Loads the document stored for `url`, if any
    pub async fn get_document(&self, url: &str) -> Result<Option<PageDocument>, PipelineError> {
        match self.get(&Self::key_for_url(url)).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Removes every stored blob
    pub async fn clear(&self) -> Result<(), PipelineError> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
