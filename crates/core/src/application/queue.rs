//! Job Queue (bounded FIFO for deferred jobs)
//!
//! Backed by a bounded `tokio::sync::mpsc` channel. Admission first reserves a
//! slot (`try_reserve`) so a full queue is detected before anything is
//! persisted, then fills the slot once the job is saved. Workers share the
//! receiving end; `close` drops the only long-lived sender so workers drain
//! what is left and then see `None`.

use crate::domain::Job;
use crate::error::AdmissionRejected;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    pub current_size: usize,
    pub max_size: usize,
    pub total_enqueued: u64,
    pub total_processed: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    processed: AtomicU64,
}

pub struct JobQueue {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    capacity: usize,
    counters: Arc<Counters>,
}

/// A reserved position in the queue. Dropping it without `send` frees the slot.
pub struct QueueSlot {
    permit: mpsc::OwnedPermit<Job>,
    counters: Arc<Counters>,
}

impl QueueSlot {
    /// Place the job in the reserved position
    pub fn send(self, job: Job) {
        debug!(job_id = %job.id, "Job enqueued");
        // Count first so a fast dequeue can never observe a negative length
        self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
        self.permit.send(job);
    }
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
            capacity,
            counters: Arc::new(Counters::default()),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Job>> {
        // A poisoned lock only means a panic happened while cloning; the Option is intact
        match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Reserve one slot without blocking
    pub fn try_reserve(&self) -> Result<QueueSlot, AdmissionRejected> {
        let sender = self.sender().ok_or(AdmissionRejected::ShuttingDown)?;
        match sender.try_reserve_owned() {
            Ok(permit) => Ok(QueueSlot {
                permit,
                counters: Arc::clone(&self.counters),
            }),
            Err(TrySendError::Full(_)) => Err(AdmissionRejected::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Closed(_)) => Err(AdmissionRejected::ShuttingDown),
        }
    }

    /// Non-blocking enqueue; fails fast with `QueueFull` at capacity
    pub fn enqueue(&self, job: Job) -> Result<(), AdmissionRejected> {
        self.try_reserve()?.send(job);
        Ok(())
    }

    /// Wait for the next job in FIFO order.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn dequeue(&self) -> Option<Job> {
        let job = self.receiver.lock().await.recv().await;
        if job.is_some() {
            self.counters.dequeued.fetch_add(1, Ordering::SeqCst);
        }
        job
    }

    /// Worker finished a dequeued job
    pub fn mark_processed(&self) {
        self.counters.processed.fetch_add(1, Ordering::SeqCst);
    }

    /// Stop accepting jobs. Already queued jobs can still be dequeued.
    pub fn close(&self) {
        let taken = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if taken.is_some() {
            debug!("Job queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    pub fn len(&self) -> usize {
        let enqueued = self.counters.enqueued.load(Ordering::SeqCst);
        let dequeued = self.counters.dequeued.load(Ordering::SeqCst);
        enqueued.saturating_sub(dequeued) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            current_size: self.len(),
            max_size: self.capacity,
            total_enqueued: self.counters.enqueued.load(Ordering::SeqCst),
            total_processed: self.counters.processed.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Complexity, Operation, RequestMode, WorkPayload};
    use std::time::Duration;

    fn job() -> Job {
        Job::new_test(
            RequestMode::Deferred,
            WorkPayload::simple(Operation::Hash, Complexity::new(1).unwrap()),
            Some("https://example.com/hook"),
        )
    }

    #[tokio::test]
    async fn test_enqueue_rejected_at_capacity() {
        let queue = JobQueue::new(3);
        for _ in 0..3 {
            queue.enqueue(job()).unwrap();
        }

        assert_eq!(
            queue.enqueue(job()).unwrap_err(),
            AdmissionRejected::QueueFull { capacity: 3 }
        );
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn test_reserved_slot_counts_against_capacity() {
        let queue = JobQueue::new(1);
        let slot = queue.try_reserve().unwrap();
        assert!(matches!(
            queue.try_reserve(),
            Err(AdmissionRejected::QueueFull { .. })
        ));

        // Abandoned reservation gives the slot back
        drop(slot);
        assert!(queue.try_reserve().is_ok());
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::new(10);
        let jobs: Vec<Job> = (0..5).map(|_| job()).collect();
        let ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();
        for j in jobs {
            queue.enqueue(j).unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(queue.dequeue().await.unwrap().id);
        }
        assert_eq!(seen, ids);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = JobQueue::new(5);
        queue.enqueue(job()).unwrap();
        queue.enqueue(job()).unwrap();
        queue.close();

        assert_eq!(queue.enqueue(job()).unwrap_err(), AdmissionRejected::ShuttingDown);
        assert!(queue.dequeue().await.is_some());
        assert!(queue.dequeue().await.is_some());
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_work() {
        let queue = Arc::new(JobQueue::new(5));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        let j = job();
        let id = j.id.clone();
        queue.enqueue(j).unwrap();
        let got = consumer.await.unwrap().unwrap();
        assert_eq!(got.id, id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueue_never_exceeds_capacity() {
        let queue = Arc::new(JobQueue::new(10));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move { queue.enqueue(job()).is_ok() }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 10);
        assert_eq!(queue.metrics().current_size, 10);
        assert_eq!(queue.metrics().total_enqueued, 10);
    }
}
