//! Admission queue: the shared priority queue of not-yet-batched items.
//!
//! Ordered by `(priority, enqueued_at, seq)` ascending. Every operation
//! takes the single lock for its own duration and never blocks waiting for
//! items; callers handle backoff.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};

use crate::error::BatchError;
use crate::types::{Priority, WorkItem};

/// Heap entry. `BinaryHeap` is a max-heap, so ordering is reversed to pop
/// the most urgent, oldest item first.
struct Queued(WorkItem);

impl Queued {
    fn key(&self) -> (Priority, std::time::Instant, u64) {
        (self.0.priority, self.0.enqueued_at, self.0.seq)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

struct Inner {
    heap: BinaryHeap<Queued>,
    closed: bool,
}

/// Mutex-guarded priority queue shared by all producers and the consumer.
pub struct AdmissionQueue {
    inner: Mutex<Inner>,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, BatchError> {
        self.inner
            .lock()
            .map_err(|e| BatchError::LockPoisoned(format!("admission queue: {e}")))
    }

    /// Enqueue an item. Fails with `ShuttingDown` once the queue is closed.
    pub fn push(&self, item: WorkItem) -> Result<(), BatchError> {
        let mut inner = self.lock()?;
        if inner.closed {
            return Err(BatchError::ShuttingDown);
        }
        inner.heap.push(Queued(item));
        Ok(())
    }

    /// Remove and return the most urgent item, if any.
    pub fn pop_min(&self) -> Result<Option<WorkItem>, BatchError> {
        Ok(self.lock()?.heap.pop().map(|q| q.0))
    }

    /// Remove up to `max` items under a single lock acquisition.
    pub fn pop_batch(&self, max: usize) -> Result<Vec<WorkItem>, BatchError> {
        let mut inner = self.lock()?;
        let take = max.min(inner.heap.len());
        Ok((0..take).filter_map(|_| inner.heap.pop().map(|q| q.0)).collect())
    }

    /// Priority of the current head, if any.
    pub fn peek_min(&self) -> Result<Option<Priority>, BatchError> {
        Ok(self.lock()?.heap.peek().map(|q| q.0.priority))
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.heap.len(),
            Err(poisoned) => poisoned.into_inner().heap.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further pushes. Items already queued stay poppable.
    pub fn close(&self) -> Result<(), BatchError> {
        self.lock()?.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        match self.inner.lock() {
            Ok(inner) => inner.closed,
            Err(poisoned) => poisoned.into_inner().closed,
        }
    }
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(priority: Priority, seq: u64) -> WorkItem {
        WorkItem::new(json!({ "seq": seq }), priority, seq).0
    }

    #[test]
    fn empty_queue_returns_none() {
        let q = AdmissionQueue::new();
        assert!(q.pop_min().unwrap().is_none());
        assert!(q.peek_min().unwrap().is_none());
        assert_eq!(q.len(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn higher_priority_pops_first() {
        let q = AdmissionQueue::new();
        q.push(item(Priority::Normal, 0)).unwrap();
        q.push(item(Priority::Background, 1)).unwrap();
        q.push(item(Priority::High, 2)).unwrap();
        q.push(item(Priority::Critical, 3)).unwrap();

        assert_eq!(q.peek_min().unwrap(), Some(Priority::Critical));
        let order: Vec<Priority> = std::iter::from_fn(|| q.pop_min().unwrap())
            .map(|i| i.priority)
            .collect();
        assert_eq!(
            order,
            vec![
                Priority::Critical,
                Priority::High,
                Priority::Normal,
                Priority::Background
            ]
        );
    }

    #[test]
    fn equal_priority_is_fifo() {
        let q = AdmissionQueue::new();
        for seq in 0..5 {
            q.push(item(Priority::Low, seq)).unwrap();
        }
        let seqs: Vec<u64> = std::iter::from_fn(|| q.pop_min().unwrap())
            .map(|i| i.seq)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn pop_batch_takes_most_urgent() {
        let q = AdmissionQueue::new();
        q.push(item(Priority::Low, 0)).unwrap();
        q.push(item(Priority::High, 1)).unwrap();
        q.push(item(Priority::Normal, 2)).unwrap();

        let batch = q.pop_batch(2).unwrap();
        let seqs: Vec<u64> = batch.iter().map(|i| i.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(q.pop_batch(10).unwrap().len(), 1);
        assert!(q.pop_batch(10).unwrap().is_empty());
    }

    #[test]
    fn closed_queue_rejects_push_but_drains() {
        let q = AdmissionQueue::new();
        q.push(item(Priority::Normal, 0)).unwrap();
        q.close().unwrap();
        assert!(q.is_closed());

        let err = q.push(item(Priority::Normal, 1)).unwrap_err();
        assert_eq!(err, BatchError::ShuttingDown);
        assert_eq!(q.len(), 1);
        assert!(q.pop_min().unwrap().is_some());
    }

    #[test]
    fn concurrent_pushes_are_all_retained() {
        let q = std::sync::Arc::new(AdmissionQueue::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let q = q.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        q.push(item(Priority::Normal, t * 100 + i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.len(), 400);
    }
}
