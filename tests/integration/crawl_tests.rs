//! Crawl scenarios against scripted collaborators
//!
//! Each test builds a small fake site, runs the coordinator to completion
//! and checks the ledger, the queue and how often each page was fetched and
//! published.

use crate::support::{fast_settings, url, Harness, ScriptedFetcher, SEED};
use site_indexer::crawler::{Admission, JobOutcome};
use site_indexer::queue::{CrawlJob, WorkQueue};
use site_indexer::state::CrawlEvent;
use site_indexer::storage::{Ledger, UrlRecord};
use site_indexer::{CrawlState, ErrorKind};
use chrono::Utc;
use std::time::Duration;

#[tokio::test]
async fn test_depth_one_crawl() {
    let fetcher = ScriptedFetcher::new()
        .page(SEED, &["/a", "b", "https://elsewhere.test/x", "#top"])
        .page(&url("/a"), &["/c", "/"])
        .page(&url("/b"), &[]);
    let h = Harness::new(fetcher, 1, fast_settings(5));

    assert_eq!(h.frontier.admit_seed(SEED).await.unwrap(), Admission::Enqueued);
    let summary = h.coordinator.run().await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.done, 3);
    assert!(summary.is_complete());

    assert_eq!(h.state(SEED), Some(CrawlState::Done));
    assert_eq!(h.state(&url("/a")), Some(CrawlState::Done));
    assert_eq!(h.state(&url("/b")), Some(CrawlState::Done));
    // beyond max depth, never admitted
    assert_eq!(h.state(&url("/c")), None);

    assert_eq!(h.ledger.get(&url("/a")).unwrap().unwrap().depth, 1);
    assert_eq!(h.pipeline.publishes(SEED), 1);
    assert_eq!(h.pipeline.total_publishes(), 3);
    assert_eq!(h.fetcher.calls(SEED), 1);
    assert_eq!(h.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let fetcher = ScriptedFetcher::new()
        .page(SEED, &[])
        .fail(SEED, 3, ErrorKind::Transient);
    let h = Harness::new(fetcher, 1, fast_settings(5));

    h.frontier.admit_seed(SEED).await.unwrap();
    let summary = h.coordinator.run().await.unwrap();

    assert_eq!(summary.done, 1);
    assert_eq!(h.state(SEED), Some(CrawlState::Done));
    assert_eq!(h.attempts(SEED), 4);
    assert_eq!(h.fetcher.calls(SEED), 4);
    assert_eq!(h.pipeline.publishes(SEED), 1);

    let record = h.ledger.get(SEED).unwrap().unwrap();
    assert!(record.content_hash.is_some());
    assert_eq!(record.last_error, None);
}

#[tokio::test]
async fn test_exhausted_retries_dead_letter() {
    let fetcher = ScriptedFetcher::new()
        .page(SEED, &[])
        .fail(SEED, 5, ErrorKind::Transient);
    let h = Harness::new(fetcher, 1, fast_settings(5));

    h.frontier.admit_seed(SEED).await.unwrap();
    let summary = h.coordinator.run().await.unwrap();

    assert_eq!(summary.dead_lettered, 1);
    assert!(summary.exceeds_threshold(0));
    assert_eq!(h.state(SEED), Some(CrawlState::DeadLettered));
    assert_eq!(h.attempts(SEED), 5);
    assert_eq!(h.fetcher.calls(SEED), 5);
    assert_eq!(h.pipeline.publishes(SEED), 0);

    let record = h.ledger.get(SEED).unwrap().unwrap();
    assert_eq!(record.last_error.as_deref(), Some("fetch: scripted failure 5"));

    let dead = h.queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job.canonical_url, SEED);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let fetcher = ScriptedFetcher::new().page(SEED, &["/missing"]);
    let h = Harness::new(fetcher, 1, fast_settings(5));

    h.frontier.admit_seed(SEED).await.unwrap();
    let summary = h.coordinator.run().await.unwrap();

    assert_eq!(summary.done, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(h.state(&url("/missing")), Some(CrawlState::Failed));
    assert_eq!(h.attempts(&url("/missing")), 1);
    assert_eq!(h.fetcher.calls(&url("/missing")), 1);
    assert!(h.queue.dead_letters().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_timeout_counts_as_transient() {
    let fetcher = ScriptedFetcher::new()
        .page(SEED, &[])
        .slow(SEED, Duration::from_millis(300));
    let mut settings = fast_settings(2);
    settings.job_timeout = Duration::from_millis(50);
    let h = Harness::new(fetcher, 1, settings);

    h.frontier.admit_seed(SEED).await.unwrap();
    let summary = h.coordinator.run().await.unwrap();

    assert_eq!(summary.dead_lettered, 1);
    assert_eq!(h.attempts(SEED), 2);
    let record = h.ledger.get(SEED).unwrap().unwrap();
    assert!(record.last_error.unwrap().starts_with("timed out"));
}

#[tokio::test]
async fn test_duplicate_messages_publish_once() {
    let fetcher = ScriptedFetcher::new().page(SEED, &[]);
    let h = Harness::new(fetcher, 1, fast_settings(5));

    h.frontier.admit_seed(SEED).await.unwrap();
    for _ in 0..3 {
        h.queue.enqueue(&CrawlJob::new(SEED, 0, 0)).await.unwrap();
    }

    let summary = h.coordinator.run().await.unwrap();

    assert_eq!(summary.done, 1);
    assert_eq!(h.fetcher.calls(SEED), 1);
    assert_eq!(h.pipeline.publishes(SEED), 1);
    assert_eq!(h.attempts(SEED), 1);
    assert_eq!(h.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_redelivery_after_done_is_discarded() {
    let fetcher = ScriptedFetcher::new().page(SEED, &[]);
    let h = Harness::new(fetcher, 1, fast_settings(5));

    h.frontier.admit_seed(SEED).await.unwrap();
    h.coordinator.run().await.unwrap();
    let before = h.ledger.get(SEED).unwrap().unwrap();

    h.queue.enqueue(&CrawlJob::new(SEED, 0, 0)).await.unwrap();
    let leased = h
        .queue
        .lease(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.coordinator.process(leased).await, JobOutcome::Discarded);
    assert_eq!(h.ledger.get(SEED).unwrap().unwrap(), before);
    assert_eq!(h.pipeline.publishes(SEED), 1);
    assert_eq!(h.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_url_is_discarded() {
    let h = Harness::new(ScriptedFetcher::new(), 1, fast_settings(5));

    h.queue
        .enqueue(&CrawlJob::new(url("/never-admitted"), 1, 0))
        .await
        .unwrap();
    let leased = h
        .queue
        .lease(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.coordinator.process(leased).await, JobOutcome::Discarded);
    assert_eq!(h.fetcher.calls(&url("/never-admitted")), 0);
}

#[tokio::test]
async fn test_restart_recovers_without_duplicate_publish() {
    let first = Harness::new(ScriptedFetcher::new(), 1, fast_settings(5));
    let ledger = first.ledger.clone();
    let long_ago = Utc::now() - chrono::Duration::seconds(120);

    // The state a crashed run leaves behind
    ledger
        .with(|l| {
            for (page, depth) in [(SEED.to_string(), 0), (url("/a"), 1), (url("/b"), 1), (url("/c"), 1)] {
                l.insert_if_absent(&UrlRecord::discovered(&page, depth, 1))?;
            }
            l.update(SEED, |r| {
                r.apply(CrawlEvent::Enqueued, 5)?;
                r.apply(CrawlEvent::Leased, 5)?;
                r.apply(CrawlEvent::Extracted, 5)?;
                r.apply(CrawlEvent::Published, 5)?;
                r.apply(CrawlEvent::Completed, 5)?;
                r.content_hash = Some("seed-hash".to_string());
                Ok(())
            })?;
            // worker died mid-fetch
            l.update(&url("/a"), |r| {
                r.apply(CrawlEvent::Enqueued, 5)?;
                r.apply(CrawlEvent::Leased, 5)?;
                r.lease_deadline = Some(long_ago);
                Ok(())
            })?;
            // worker died between publish and completion
            l.update(&url("/b"), |r| {
                r.apply(CrawlEvent::Enqueued, 5)?;
                r.apply(CrawlEvent::Leased, 5)?;
                r.apply(CrawlEvent::Extracted, 5)?;
                r.apply(CrawlEvent::Published, 5)?;
                r.content_hash = Some("b-hash".to_string());
                r.lease_deadline = Some(long_ago);
                Ok(())
            })
            // /c never made it onto the queue
        })
        .unwrap();

    let fetcher = ScriptedFetcher::new()
        .page(SEED, &["/a", "/b", "/c"])
        .page(&url("/a"), &[])
        .page(&url("/b"), &[])
        .page(&url("/c"), &[]);
    let h = Harness::with_ledger(ledger, fetcher, 1, fast_settings(5));

    assert_eq!(h.frontier.admit_seed(SEED).await.unwrap(), Admission::Duplicate);
    assert_eq!(h.frontier.resume().await.unwrap().pushed, 3);

    let summary = h.coordinator.run().await.unwrap();

    assert_eq!(summary.done, 4);
    assert!(summary.is_complete());

    assert_eq!(h.fetcher.calls(SEED), 0);
    assert_eq!(h.fetcher.calls(&url("/b")), 0);
    assert_eq!(h.pipeline.publishes(&url("/b")), 0);

    assert_eq!(h.fetcher.calls(&url("/a")), 1);
    assert_eq!(h.attempts(&url("/a")), 2);
    assert_eq!(h.pipeline.publishes(&url("/a")), 1);
    assert_eq!(h.pipeline.publishes(&url("/c")), 1);
}

#[tokio::test]
async fn test_queue_outage_backs_off_and_recovers() {
    let fetcher = ScriptedFetcher::new().page(SEED, &["/a"]).page(&url("/a"), &[]);
    let h = Harness::new(fetcher, 1, fast_settings(5));

    h.frontier.admit_seed(SEED).await.unwrap();
    h.queue.fail_next(4);

    let summary = h.coordinator.run().await.unwrap();

    assert_eq!(summary.done, 2);
    assert_eq!(h.pipeline.total_publishes(), 2);
}

#[tokio::test]
async fn test_deferred_seed_is_picked_up() {
    let fetcher = ScriptedFetcher::new().page(SEED, &[]);
    let h = Harness::new(fetcher, 1, fast_settings(5));

    h.queue.fail_next(1);
    assert_eq!(h.frontier.admit_seed(SEED).await.unwrap(), Admission::Deferred);
    assert_eq!(h.state(SEED), Some(CrawlState::Discovered));

    let summary = h.coordinator.run().await.unwrap();

    assert_eq!(summary.done, 1);
    assert_eq!(h.pipeline.publishes(SEED), 1);
}

#[tokio::test]
async fn test_refused_requeue_does_not_end_crawl() {
    let fetcher = ScriptedFetcher::new().page(SEED, &[]);
    let mut settings = fast_settings(5);
    settings.concurrency = 1;
    let h = Harness::new(fetcher, 1, settings);

    // seed push, then the first drain-time re-enqueues
    h.queue.fail_next_enqueue(3);
    assert_eq!(h.frontier.admit_seed(SEED).await.unwrap(), Admission::Deferred);

    let summary = h.coordinator.run().await.unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.done, 1);
    assert_eq!(h.state(SEED), Some(CrawlState::Done));
    assert_eq!(h.pipeline.publishes(SEED), 1);
}

#[tokio::test]
async fn test_off_site_redirect_fails() {
    let fetcher = ScriptedFetcher::new()
        .page(SEED, &["/moved", "/inside"])
        .page(&url("/moved"), &[])
        .redirect(&url("/moved"), "https://other.test/landing")
        .page(&url("/inside"), &[])
        .redirect(&url("/inside"), &url("/landing"));
    let h = Harness::new(fetcher, 1, fast_settings(5));

    h.frontier.admit_seed(SEED).await.unwrap();
    let summary = h.coordinator.run().await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(h.state(&url("/moved")), Some(CrawlState::Failed));
    assert_eq!(h.attempts(&url("/moved")), 1);
    assert_eq!(h.pipeline.publishes(&url("/moved")), 0);
    let record = h.ledger.get(&url("/moved")).unwrap().unwrap();
    assert!(record
        .last_error
        .unwrap()
        .starts_with("redirected to https://other.test/landing"));

    // a redirect that stays on the site is fine
    assert_eq!(h.state(&url("/inside")), Some(CrawlState::Done));
    assert_eq!(h.pipeline.publishes(&url("/inside")), 1);
}

#[tokio::test]
async fn test_shutdown_stops_leasing() {
    let fetcher = ScriptedFetcher::new().page(SEED, &[]);
    let h = Harness::new(fetcher, 1, fast_settings(5));

    h.frontier.admit_seed(SEED).await.unwrap();
    h.coordinator.shutdown_token().cancel();

    let summary = h.coordinator.run().await.unwrap();

    assert_eq!(summary.in_progress, 1);
    assert_eq!(h.fetcher.calls(SEED), 0);
    assert_eq!(h.state(SEED), Some(CrawlState::Queued));
    assert_eq!(h.queue.depth().await.unwrap(), 1);
}
