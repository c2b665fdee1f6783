//! Statistics generation from the crawl ledger
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer.

use crate::state::CrawlState;
use crate::storage::{Ledger, LedgerHandle, RunRecord, StorageResult, UrlRecord};
use std::collections::HashMap;

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Total number of URLs in the ledger
    pub total_urls: u64,

    /// Count of URLs by state
    pub urls_by_state: HashMap<CrawlState, u64>,

    /// The most recent run, if any
    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from the ledger
pub fn load_statistics(ledger: &LedgerHandle) -> StorageResult<CrawlStatistics> {
    ledger.with(|l| {
        Ok(CrawlStatistics {
            total_urls: l.count_total()?,
            urls_by_state: l.count_by_state()?,
            latest_run: l.get_latest_run()?,
        })
    })
}

/// Dead-lettered records, oldest discovery first
pub fn load_dead_letters(ledger: &LedgerHandle) -> StorageResult<Vec<UrlRecord>> {
    ledger.with(|l| l.records_in_state(CrawlState::DeadLettered))
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        println!("Latest run:");
        println!("  Id: {}", run.id);
        println!("  Status: {}", run.status.to_db_string());
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!();
    }

    println!("URLs by State:");
    for state in CrawlState::all_states() {
        let count = stats.urls_by_state.get(&state).copied().unwrap_or(0);
        if count == 0 {
            continue;
        }
        let percentage = if stats.total_urls > 0 {
            (count as f64 / stats.total_urls as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
    println!();

    let done = stats
        .urls_by_state
        .get(&CrawlState::Done)
        .copied()
        .unwrap_or(0);
    let success_rate = if stats.total_urls > 0 {
        (done as f64 / stats.total_urls as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} URLs indexed)",
        success_rate, done, stats.total_urls
    );
}

/// Prints one line per dead-lettered URL with its last error
pub fn print_dead_letters(records: &[UrlRecord]) {
    if records.is_empty() {
        println!("No dead-lettered URLs.");
        return;
    }

    println!("=== Dead-lettered URLs ({}) ===\n", records.len());
    for record in records {
        println!(
            "{}\n  depth {}, {} attempts, last error: {}",
            record.canonical_url,
            record.depth,
            record.attempt_count,
            record.last_error.as_deref().unwrap_or("-")
        );
    }
}
