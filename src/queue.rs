//! Shared queue state: a bounded FIFO of pending jobs plus the ordered set of
//! job ids that are enqueued but not yet claimed by a worker.
//!
//! One `JobQueue` is created per process and shared by `Arc` with every
//! producer and worker. The pending-id lock is only ever held for a single
//! insert, remove, or lookup.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{GenerateRequest, JobId};

/// One unit of queued work.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub job_id: JobId,
    pub request: GenerateRequest,
}

/// Ordered set of job ids waiting for a worker.
#[derive(Debug, Default)]
struct PendingIds {
    ids: VecDeque<JobId>,
}

impl PendingIds {
    fn insert(&mut self, id: JobId) {
        if !self.ids.contains(&id) {
            self.ids.push_back(id);
        }
    }

    /// Remove `id` if present. Absence is not an error.
    fn remove(&mut self, id: &JobId) -> bool {
        match self.ids.iter().position(|p| p == id) {
            Some(idx) => {
                self.ids.remove(idx);
                true
            }
            None => false,
        }
    }

    fn position(&self, id: &JobId) -> Option<usize> {
        self.ids.iter().position(|p| p == id)
    }
}

/// Bounded multi-producer, multi-consumer job queue.
pub struct JobQueue {
    /// `None` once the queue has been closed.
    tx: Mutex<Option<mpsc::Sender<QueueItem>>>,
    rx: Mutex<mpsc::Receiver<QueueItem>>,
    pending: Mutex<PendingIds>,
    queued: AtomicUsize,
    unfinished: AtomicUsize,
    acknowledged: AtomicUsize,
    drained: Notify,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            pending: Mutex::new(PendingIds::default()),
            queued: AtomicUsize::new(0),
            unfinished: AtomicUsize::new(0),
            acknowledged: AtomicUsize::new(0),
            drained: Notify::new(),
            capacity,
        }
    }

    async fn sender(&self) -> Result<mpsc::Sender<QueueItem>> {
        self.tx.lock().await.clone().ok_or(Error::QueueClosed)
    }

    /// Register `job_id` as pending, then append it to the queue, waiting for
    /// capacity if the queue is full.
    pub async fn enqueue(&self, job_id: JobId, request: GenerateRequest) -> Result<()> {
        let tx = self.sender().await?;
        self.register(&job_id).await;

        let item = QueueItem {
            job_id: job_id.clone(),
            request,
        };
        if tx.send(item).await.is_err() {
            self.rollback(&job_id).await;
            return Err(Error::QueueClosed);
        }
        Ok(())
    }

    /// Like [`enqueue`](Self::enqueue) but fails with `QueueFull` instead of
    /// waiting for capacity.
    pub async fn try_enqueue(&self, job_id: JobId, request: GenerateRequest) -> Result<()> {
        let tx = self.sender().await?;
        self.register(&job_id).await;

        let item = QueueItem {
            job_id: job_id.clone(),
            request,
        };
        match tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.rollback(&job_id).await;
                Err(Error::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.rollback(&job_id).await;
                Err(Error::QueueClosed)
            }
        }
    }

    async fn register(&self, job_id: &JobId) {
        self.pending.lock().await.insert(job_id.clone());
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.unfinished.fetch_add(1, Ordering::SeqCst);
    }

    async fn rollback(&self, job_id: &JobId) {
        self.pending.lock().await.remove(job_id);
        self.queued.fetch_sub(1, Ordering::SeqCst);
        self.finish_one();
    }

    /// Wait for the next item. Returns `None` once the queue is closed and
    /// every remaining item has been taken.
    pub async fn dequeue(&self) -> Option<QueueItem> {
        let item = self.rx.lock().await.recv().await?;
        self.queued.fetch_sub(1, Ordering::SeqCst);
        Some(item)
    }

    /// Drop `job_id` from the pending set. Idempotent.
    pub async fn claim(&self, job_id: &JobId) -> bool {
        self.pending.lock().await.remove(job_id)
    }

    /// Mark one dequeued item as fully processed.
    pub fn acknowledge(&self) {
        self.acknowledged.fetch_add(1, Ordering::SeqCst);
        if !self.finish_one() {
            warn!("acknowledge called with no unfinished jobs");
        }
    }

    /// Returns `false` if there was nothing left to finish.
    fn finish_one(&self) -> bool {
        let prev = self
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if prev == Ok(1) {
            self.drained.notify_waiters();
        }
        prev.is_ok()
    }

    /// Wait until every enqueued item has been acknowledged.
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent final ack is not missed.
            notified.as_mut().enable();
            if self.unfinished.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting new items. Items already queued can still be dequeued;
    /// after that `dequeue` returns `None`.
    pub async fn close(&self) {
        self.tx.lock().await.take();
    }

    pub async fn is_pending(&self, job_id: &JobId) -> bool {
        self.pending.lock().await.position(job_id).is_some()
    }

    /// 1-based position among jobs still waiting for a worker.
    pub async fn queue_position(&self, job_id: &JobId) -> Option<usize> {
        self.pending.lock().await.position(job_id).map(|p| p + 1)
    }

    /// Number of jobs enqueued but not yet acknowledged.
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::SeqCst)
    }

    /// Total `acknowledge` calls, including any that had nothing to finish.
    pub fn acknowledged(&self) -> usize {
        self.acknowledged.load(Ordering::SeqCst)
    }

    /// Number of items currently sitting in the queue.
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn dequeue_is_fifo() {
        let queue = JobQueue::new(4);
        for id in ["a", "b", "c"] {
            queue.enqueue(id.into(), GenerateRequest::default()).await.unwrap();
        }
        for id in ["a", "b", "c"] {
            assert_eq!(queue.dequeue().await.unwrap().job_id, JobId::from(id));
        }
    }

    #[tokio::test]
    async fn pending_positions_track_claims() {
        let queue = JobQueue::new(4);
        queue.enqueue("a".into(), GenerateRequest::default()).await.unwrap();
        queue.enqueue("b".into(), GenerateRequest::default()).await.unwrap();
        assert_eq!(queue.queue_position(&"b".into()).await, Some(2));

        assert!(queue.claim(&"a".into()).await);
        assert!(!queue.claim(&"a".into()).await);
        assert_eq!(queue.queue_position(&"b".into()).await, Some(1));
        assert!(!queue.is_pending(&"a".into()).await);
    }

    #[tokio::test]
    async fn try_enqueue_rejects_when_full() {
        let queue = JobQueue::new(1);
        queue.try_enqueue("a".into(), GenerateRequest::default()).await.unwrap();
        let err = queue
            .try_enqueue("b".into(), GenerateRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueueFull));
        assert!(!queue.is_pending(&"b".into()).await);
        assert_eq!(queue.unfinished(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn join_waits_for_acknowledgements() {
        let queue = Arc::new(JobQueue::new(4));
        queue.enqueue("a".into(), GenerateRequest::default()).await.unwrap();

        let q = Arc::clone(&queue);
        let joined = tokio::spawn(async move { q.join().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!joined.is_finished());

        queue.dequeue().await.unwrap();
        queue.acknowledge();
        tokio::time::timeout(Duration::from_secs(1), joined)
            .await
            .expect("join should complete after ack")
            .unwrap();
    }

    #[tokio::test]
    async fn extra_acknowledge_does_not_underflow() {
        let queue = JobQueue::new(2);
        queue.enqueue("a".into(), GenerateRequest::default()).await.unwrap();
        queue.dequeue().await.unwrap();

        queue.acknowledge();
        queue.acknowledge();
        assert_eq!(queue.unfinished(), 0);
        assert_eq!(queue.acknowledged(), 2);

        // A fresh item is still tracked normally afterwards.
        queue.enqueue("b".into(), GenerateRequest::default()).await.unwrap();
        assert_eq!(queue.unfinished(), 1);
    }

    #[tokio::test]
    async fn closed_queue_drains_then_ends() {
        let queue = JobQueue::new(2);
        queue.enqueue("a".into(), GenerateRequest::default()).await.unwrap();
        queue.close().await;

        assert!(matches!(
            queue.enqueue("b".into(), GenerateRequest::default()).await,
            Err(Error::QueueClosed)
        ));
        assert_eq!(queue.dequeue().await.unwrap().job_id, JobId::from("a"));
        assert!(queue.dequeue().await.is_none());
    }
}
