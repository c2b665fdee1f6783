//! In-process queue backend

use crate::queue::{
    new_lease_token, CrawlJob, DeadLetter, LeaseHandle, LeasedJob, QueueError, QueueResult,
    WorkQueue,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct Message {
    job: CrawlJob,
    visible_at: Instant,
    token: Option<String>,
    dequeue_count: u32,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    messages: BTreeMap<i64, Message>,
    dead: Vec<DeadLetter>,
    failures_remaining: u32,
    enqueue_failures_remaining: u32,
}

/// Queue kept entirely in memory
///
/// Same semantics as the durable backend, minus durability. Uses tokio's
/// clock, so tests running with paused time see visibility timeouts expire.
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` operations fail with `Unavailable`
    pub fn fail_next(&self, n: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures_remaining = n;
        }
    }

    /// Makes the next `n` enqueues fail with `Unavailable`; leases still work
    pub fn fail_next_enqueue(&self, n: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.enqueue_failures_remaining = n;
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> QueueResult<T>) -> QueueResult<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".to_string()))?;

        if inner.failures_remaining > 0 {
            inner.failures_remaining -= 1;
            return Err(QueueError::Unavailable("injected failure".to_string()));
        }

        f(&mut inner)
    }
}

impl Inner {
    /// Finds the message a lease refers to, if that lease is still current
    fn held(&mut self, lease: &LeaseHandle) -> QueueResult<&mut Message> {
        match self.messages.get_mut(&lease.message_id) {
            Some(msg) if msg.token.as_deref() == Some(lease.token.as_str()) => Ok(msg),
            _ => Err(QueueError::LeaseLost(lease.message_id)),
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, job: &CrawlJob) -> QueueResult<()> {
        self.with(|inner| {
            if inner.enqueue_failures_remaining > 0 {
                inner.enqueue_failures_remaining -= 1;
                return Err(QueueError::Unavailable("injected enqueue failure".to_string()));
            }

            inner.next_id += 1;
            let id = inner.next_id;
            inner.messages.insert(
                id,
                Message {
                    job: job.clone(),
                    visible_at: Instant::now(),
                    token: None,
                    dequeue_count: 0,
                },
            );
            Ok(())
        })
    }

    async fn lease(&self, visibility: Duration) -> QueueResult<Option<LeasedJob>> {
        self.with(|inner| {
            let now = Instant::now();
            let candidate = inner
                .messages
                .iter_mut()
                .filter(|(_, msg)| msg.visible_at <= now)
                .min_by_key(|(id, msg)| (msg.visible_at, **id));

            let Some((id, msg)) = candidate else {
                return Ok(None);
            };

            let token = new_lease_token();
            msg.visible_at = now + visibility;
            msg.token = Some(token.clone());
            msg.dequeue_count += 1;

            Ok(Some(LeasedJob {
                job: msg.job.clone(),
                lease: LeaseHandle {
                    message_id: *id,
                    token,
                },
                dequeue_count: msg.dequeue_count,
            }))
        })
    }

    async fn ack(&self, lease: &LeaseHandle) -> QueueResult<()> {
        self.with(|inner| {
            inner.held(lease)?;
            inner.messages.remove(&lease.message_id);
            Ok(())
        })
    }

    async fn release(&self, lease: &LeaseHandle, delay: Duration) -> QueueResult<()> {
        self.with(|inner| {
            let msg = inner.held(lease)?;
            msg.visible_at = Instant::now() + delay;
            msg.token = None;
            Ok(())
        })
    }

    async fn dead_letter(&self, lease: &LeaseHandle, reason: &str) -> QueueResult<()> {
        self.with(|inner| {
            inner.held(lease)?;
            if let Some(msg) = inner.messages.remove(&lease.message_id) {
                inner.dead.push(DeadLetter {
                    job: msg.job,
                    reason: reason.to_string(),
                    dequeue_count: msg.dequeue_count,
                    dead_lettered_at: Utc::now(),
                });
            }
            Ok(())
        })
    }

    async fn depth(&self) -> QueueResult<u64> {
        self.with(|inner| Ok(inner.messages.len() as u64))
    }

    async fn dead_letters(&self) -> QueueResult<Vec<DeadLetter>> {
        self.with(|inner| Ok(inner.dead.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(path: &str) -> CrawlJob {
        CrawlJob::new(format!("https://example.com{}", path), 1, 0)
    }

    #[tokio::test]
    async fn test_fifo_lease_and_ack() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job("/a")).await.unwrap();
        queue.enqueue(&job("/b")).await.unwrap();

        let first = queue.lease(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(first.job, job("/a"));
        assert_eq!(first.dequeue_count, 1);

        queue.ack(&first.lease).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_leased_message_is_invisible_but_counted() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job("/a")).await.unwrap();

        let _leased = queue.lease(Duration::from_secs(30)).await.unwrap().unwrap();
        assert!(queue.lease(Duration::from_secs(30)).await.unwrap().is_none());
        assert_eq!(queue.depth().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_timeout_redelivers() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job("/a")).await.unwrap();

        let first = queue.lease(Duration::from_secs(5)).await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        let second = queue.lease(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(second.job, first.job);
        assert_eq!(second.dequeue_count, 2);

        // the first holder's lease is gone
        assert!(matches!(
            queue.ack(&first.lease).await,
            Err(QueueError::LeaseLost(_))
        ));
        queue.ack(&second.lease).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_with_delay() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job("/a")).await.unwrap();

        let leased = queue.lease(Duration::from_secs(30)).await.unwrap().unwrap();
        queue
            .release(&leased.lease, Duration::from_secs(2))
            .await
            .unwrap();

        assert!(queue.lease(Duration::from_secs(30)).await.unwrap().is_none());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(queue.lease(Duration::from_secs(30)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dead_letter() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job("/a")).await.unwrap();

        let leased = queue.lease(Duration::from_secs(30)).await.unwrap().unwrap();
        queue.dead_letter(&leased.lease, "boom").await.unwrap();

        assert_eq!(queue.depth().await.unwrap(), 0);
        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job, job("/a"));
        assert_eq!(dead[0].reason, "boom");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let queue = MemoryQueue::new();
        queue.fail_next(2);

        assert!(matches!(
            queue.enqueue(&job("/a")).await,
            Err(QueueError::Unavailable(_))
        ));
        assert!(queue.depth().await.is_err());
        assert!(queue.enqueue(&job("/a")).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_enqueue_failures() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job("/a")).await.unwrap();
        queue.fail_next_enqueue(1);

        assert!(queue.enqueue(&job("/b")).await.is_err());
        assert!(queue.lease(Duration::from_secs(30)).await.unwrap().is_some());
        assert!(queue.enqueue(&job("/b")).await.is_ok());
        assert_eq!(queue.depth().await.unwrap(), 2);
    }
}
