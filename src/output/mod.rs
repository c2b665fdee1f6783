//! Output module for crawl summaries and reports
//!
//! This module handles:
//! - The end-of-run summary returned by the coordinator
//! - Ledger statistics for `--stats`
//! - The dead-letter report for `--dead-letters`

pub mod stats;

pub use stats::{
    load_dead_letters, load_statistics, print_dead_letters, print_statistics, CrawlStatistics,
};

use crate::state::CrawlState;
use std::collections::HashMap;
use std::fmt;

/// Record counts at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub done: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    /// Records in any non-terminal state
    pub in_progress: u64,
    pub total: u64,
}

impl CrawlSummary {
    /// Builds a summary from per-state counts
    pub fn from_counts(counts: &HashMap<CrawlState, u64>) -> Self {
        let count = |state: CrawlState| counts.get(&state).copied().unwrap_or(0);

        let in_progress = CrawlState::non_terminal_states()
            .into_iter()
            .map(count)
            .sum();

        Self {
            done: count(CrawlState::Done),
            failed: count(CrawlState::Failed),
            dead_lettered: count(CrawlState::DeadLettered),
            in_progress,
            total: counts.values().sum(),
        }
    }

    /// True when more URLs were dead-lettered than `threshold` allows
    pub fn exceeds_threshold(&self, threshold: u64) -> bool {
        self.dead_lettered > threshold
    }

    /// True when every record reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.in_progress == 0
    }
}

impl fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} URLs: {} done, {} failed, {} dead-lettered, {} unfinished",
            self.total, self.done, self.failed, self.dead_lettered, self.in_progress
        )
    }
}
