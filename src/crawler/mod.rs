//! Crawler module: workers, admission and the fetch collaborators
//!
//! This module contains the core crawling logic, including:
//! - Admission of discovered URLs through the ledger (`Frontier`)
//! - The worker pool driving each URL through the state machine (`Coordinator`)
//! - Retry and backoff policy
//! - HTTP fetching and HTML parsing

mod coordinator;
mod fetcher;
mod frontier;
mod parser;
mod retry;

pub use coordinator::{Coordinator, CrawlSettings, JobOutcome};
pub use fetcher::{
    build_http_client, classify_status, FetchError, FetchedPage, HttpFetcher, PageFetcher,
};
pub use frontier::{Admission, Frontier, RejectReason, Resumption};
pub use parser::{parse_html, ParsedPage};
pub use retry::RetryPolicy;
