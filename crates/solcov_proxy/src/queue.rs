//! The FIFO queue of deferred trace work.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::Value;

/// How often a drain re-checks whether the queue has emptied.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One unit of deferred trace work. Consumed strictly FIFO, discarded after
/// processing, never retried.
#[derive(Clone, Debug, PartialEq)]
pub enum Job {
    /// Trace a submitted transaction by its hash.
    Transaction { tx_hash: String },
    /// Trace a call descriptor against a pinned block number.
    Call { call: Value, block_number: u64 },
}

/// FIFO job queue shared between the proxy handlers (producers) and the
/// dispatcher (single consumer).
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    /// Jobs enqueued but not yet fully processed; covers the job the
    /// dispatcher currently has in flight.
    pending: AtomicUsize,
}

impl JobQueue {
    /// Appends a job.
    pub fn push(&self, job: Job) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().push_back(job);
    }

    /// Takes the oldest job. The job stays counted as pending until the
    /// consumer calls [`JobQueue::complete`].
    pub fn pop(&self) -> Option<Job> {
        self.jobs.lock().pop_front()
    }

    /// Marks the most recently popped job as fully processed.
    pub fn complete(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of jobs enqueued or in flight.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Blocks until the queue is observably empty, polling at a coarse
    /// interval. Does not stop new jobs from being enqueued concurrently.
    pub async fn drain(&self) {
        while self.pending() > 0 {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn tx(hash: &str) -> Job {
        Job::Transaction {
            tx_hash: hash.to_string(),
        }
    }

    #[test]
    fn jobs_come_out_in_enqueue_order() {
        let queue = JobQueue::default();
        queue.push(tx("0x1"));
        queue.push(tx("0x2"));
        queue.push(tx("0x3"));

        assert_eq!(queue.pop(), Some(tx("0x1")));
        assert_eq!(queue.pop(), Some(tx("0x2")));
        assert_eq!(queue.pop(), Some(tx("0x3")));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn pending_covers_in_flight_jobs() {
        let queue = JobQueue::default();
        queue.push(tx("0x1"));
        queue.push(tx("0x2"));
        assert_eq!(queue.pending(), 2);

        let _job = queue.pop().unwrap();
        // Popped but not completed: still pending.
        assert_eq!(queue.pending(), 2);

        queue.complete();
        assert_eq!(queue.pending(), 1);
    }

    #[tokio::test]
    async fn drain_blocks_until_all_jobs_complete() {
        let queue = Arc::new(JobQueue::default());
        for index in 0..5 {
            queue.push(tx(&format!("0x{index}")));
        }

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while seen.len() < 5 {
                    if let Some(job) = queue.pop() {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        seen.push(job);
                        queue.complete();
                    } else {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                }
                seen
            })
        };

        queue.drain().await;
        assert_eq!(queue.pending(), 0);

        let seen = consumer.await.unwrap();
        let expected: Vec<_> = (0..5).map(|index| tx(&format!("0x{index}"))).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn drain_returns_immediately_when_empty() {
        let queue = JobQueue::default();
        queue.drain().await;
    }
}
