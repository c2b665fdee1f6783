//! State module for tracking crawl progress
//!
//! Every URL moves through a small state machine. The transition table is the
//! only place that decides which moves are legal; the ledger applies it inside
//! its update transaction.
//!
//! # Components
//!
//! - `CrawlState`: where a URL is (discovered, queued, fetching, ..., done)
//! - `CrawlEvent`: what happened to it
//! - `TransitionError`: an event that is not allowed in the current state

mod crawl_state;

pub use crawl_state::{CrawlEvent, CrawlState, TransitionError};
