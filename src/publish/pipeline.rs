//! The default content pipeline: HTML to blob document and search index

use crate::crawler::parse_html;
use crate::publish::{
    BlobStore, ContentPipeline, ExtractedContent, PageDocument, PipelineError, PublishMetadata,
    SqliteSearchIndex,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Extracts with the HTML parser and publishes to disk and FTS
pub struct IndexingPipeline {
    blobs: BlobStore,
    index: Arc<SqliteSearchIndex>,
}

impl IndexingPipeline {
    pub fn new(blobs: BlobStore, index: Arc<SqliteSearchIndex>) -> Self {
        Self { blobs, index }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn index(&self) -> &SqliteSearchIndex {
        &self.index
    }
}

#[async_trait]
impl ContentPipeline for IndexingPipeline {
    async fn extract(&self, url: &Url, raw_html: &str) -> Result<ExtractedContent, PipelineError> {
        if raw_html.trim().is_empty() {
            return Err(PipelineError::permanent(format!("Empty document at {}", url)));
        }

        let parsed = parse_html(raw_html, url);
        Ok(ExtractedContent::new(parsed.title, parsed.text))
    }

    async fn publish(
        &self,
        url: &Url,
        content: &ExtractedContent,
        metadata: &PublishMetadata,
    ) -> Result<(), PipelineError> {
        let document = PageDocument {
            url: metadata.canonical_url.clone(),
            final_url: metadata.final_url.clone(),
            title: content.title.clone(),
            text: content.text.clone(),
            content_hash: content.content_hash.clone(),
            depth: metadata.depth,
            fetched_at: metadata.fetched_at,
            run_id: metadata.run_id,
        };

        self.blobs.put_document(&document).await?;
        self.index
            .upsert(url.as_str(), content.title.as_deref(), &content.text)?;

        debug!("Published {} ({})", url, content.content_hash);
        Ok(())
    }
}
