// Priority queue over votes keyed by expiry deadline.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::vote::Vote;

/// Min-heap of votes ordered by deadline (earliest first).
///
/// The queue is append-only for identities: re-submission of an identity is
/// never reflected here, and entries whose identity has since been removed
/// from the owning store are silently dropped when they surface.
pub struct ExpiryQueue {
    heap: BinaryHeap<QueueItem>,
}

impl ExpiryQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    /// Number of queued votes.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Inserts a vote keyed by its deadline.
    pub fn insert(&mut self, vote: Vote) {
        self.heap.push(QueueItem { vote });
    }

    /// Removes and returns the vote with the earliest deadline.
    pub fn pop(&mut self) -> Option<Vote> {
        self.heap.pop().map(|item| item.vote)
    }

    /// Removes every vote whose deadline is at or before `now`, in
    /// deadline-ascending order. An empty queue yields an empty batch.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<Vote> {
        let mut expired = Vec::new();
        while self
            .heap
            .peek()
            .map_or(false, |item| item.vote.expire_at <= now)
        {
            if let Some(item) = self.heap.pop() {
                expired.push(item.vote);
            }
        }
        expired
    }
}

impl Default for ExpiryQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct QueueItem {
    vote: Vote,
}

// BinaryHeap is a max-heap; comparisons are reversed so the earliest
// deadline surfaces first.
impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other.vote.expire_at.cmp(&self.vote.expire_at)
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.vote.expire_at == other.vote.expire_at
    }
}

impl Eq for QueueItem {}
