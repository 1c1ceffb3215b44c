//! Pending window expiries.
//!
//! Every bucket gets exactly one expiry when it is created. When an expired
//! bucket is replaced before it was reaped, the old expiry is cancelled, so
//! a key has at most one pending expiry at a time. Expiries are
//! kept in a deadline-ordered min-heap instead of one runtime timer each,
//! so draining due entries and cancelling all of them are both plain,
//! synchronous operations on a single structure.

use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tokio::time::Instant;

use super::key::BucketKey;

/// A scheduled deletion of one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    /// When the bucket's window ends
    pub deadline: Instant,
    /// The bucket to delete
    pub key: BucketKey,
    /// Generation of the bucket this expiry was created for
    pub generation: u64,
}

impl Ord for Expiry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.generation.cmp(&other.generation))
    }
}

impl PartialOrd for Expiry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deadline-ordered set of pending expiries.
#[derive(Debug, Default)]
pub struct ExpiryQueue {
    heap: Mutex<BinaryHeap<Reverse<Expiry>>>,
}

impl ExpiryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an expiry.
    ///
    /// Returns `true` when it became the earliest pending deadline, so a
    /// sleeping reaper knows to wake up early.
    pub fn schedule(&self, expiry: Expiry) -> bool {
        let mut heap = self.heap.lock();
        let earliest = heap
            .peek()
            .map_or(true, |Reverse(head)| expiry.deadline < head.deadline);
        heap.push(Reverse(expiry));
        earliest
    }

    /// Remove and return every expiry whose deadline is at or before `now`,
    /// earliest first.
    pub fn pop_due(&self, now: Instant) -> Vec<Expiry> {
        let mut heap = self.heap.lock();
        let mut due = Vec::new();
        while heap.peek().is_some_and(|Reverse(head)| head.deadline <= now) {
            if let Some(Reverse(expiry)) = heap.pop() {
                due.push(expiry);
            }
        }
        due
    }

    /// The earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.lock().peek().map(|Reverse(head)| head.deadline)
    }

    /// Drop the expiry scheduled for `generation` of `key`, if it is pending.
    pub fn cancel(&self, key: &BucketKey, generation: u64) -> bool {
        let mut heap = self.heap.lock();
        let before = heap.len();
        heap.retain(|Reverse(e)| !(e.generation == generation && &e.key == key));
        heap.len() < before
    }

    /// Drop every pending expiry and return how many there were.
    pub fn cancel_all(&self) -> usize {
        let mut heap = self.heap.lock();
        let cancelled = heap.len();
        heap.clear();
        cancelled
    }

    /// Number of pending expiries.
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}
