//! URL handling module for Site-Indexer
//!
//! This module turns raw link targets into canonical URLs and decides which of
//! them belong to the crawl. Canonical URLs are the identity of a page
//! everywhere else: ledger keys, queue payloads and published documents.

mod normalize;
mod scope;

pub use normalize::{canonicalize, CanonicalPolicy, TrailingSlash};
pub use scope::{ScopePolicy, ScopeViolation};
