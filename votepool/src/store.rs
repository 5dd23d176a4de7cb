// Canonical vote index for a single event type.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;

use crate::queue::ExpiryQueue;
use crate::vote::{Vote, VoteKey};

/// Stores votes of one event type: `event_hash -> pub_key -> Vote`, plus the
/// expiry queue that drives pruning.
///
/// No validation or deduplication happens here; callers guarantee both.
pub struct VoteStore {
    inner: RwLock<StoreInner>,
}

struct StoreInner {
    votes: HashMap<Vec<u8>, HashMap<Vec<u8>, Vote>>,
    queue: ExpiryQueue,
}

impl VoteStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                votes: HashMap::new(),
                queue: ExpiryQueue::new(),
            }),
        }
    }

    /// Inserts a vote into the index and the expiry queue.
    pub fn add(&self, vote: Vote) {
        let mut inner = self.inner.write();
        inner.queue.insert(vote.clone());
        inner
            .votes
            .entry(vote.event_hash.clone())
            .or_default()
            .insert(vote.pub_key.clone(), vote);
    }

    /// Snapshot of all votes under an event hash, in unspecified order.
    pub fn by_hash(&self, event_hash: &[u8]) -> Vec<Vote> {
        let inner = self.inner.read();
        match inner.votes.get(event_hash) {
            Some(signers) => signers.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Snapshot of every vote in the store, in unspecified order.
    pub fn all(&self) -> Vec<Vote> {
        let inner = self.inner.read();
        inner
            .votes
            .values()
            .flat_map(|signers| signers.values().cloned())
            .collect()
    }

    /// Number of stored votes.
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.votes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every vote and resets the expiry queue.
    pub fn flush(&self) {
        let mut inner = self.inner.write();
        inner.votes.clear();
        inner.queue = ExpiryQueue::new();
    }

    /// Removes votes whose deadline is at or before `now` and returns their
    /// identities so the caller can reclaim dedup entries.
    ///
    /// A popped identity the index no longer contains (a flush ran in
    /// between) is skipped silently.
    pub fn prune(&self, now: Instant) -> Vec<VoteKey> {
        let mut inner = self.inner.write();
        let expired = inner.queue.pop_expired(now);
        let mut keys = Vec::with_capacity(expired.len());
        for vote in expired {
            keys.push(vote.key());
            if let Some(signers) = inner.votes.get_mut(&vote.event_hash) {
                signers.remove(&vote.pub_key);
                if signers.is_empty() {
                    inner.votes.remove(&vote.event_hash);
                }
            }
        }
        keys
    }
}

impl Default for VoteStore {
    fn default() -> Self {
        Self::new()
    }
}
