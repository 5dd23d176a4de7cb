// Tunables for the vote pool and its reactor.

use std::time::Duration;

/// Configuration for the vote pool and reactor.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long an admitted vote is kept before it becomes prunable.
    pub keep_alive: Duration,

    /// Period of the background prune tick.
    pub prune_interval: Duration,

    /// How long a vote received from a peer suppresses echoing it back to
    /// that peer. After the timeout the vote may be sent again so a lost
    /// send can retry through normal flow.
    pub peer_cache_timeout: Duration,

    /// Capacity of the pool-wide cache of recently admitted vote identities.
    pub vote_cache_size: usize,

    /// Capacity of each peer's receive cache.
    pub peer_cache_size: usize,

    /// Buffer size for event bus subscriptions.
    pub subscribe_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(30),
            prune_interval: Duration::from_secs(3),
            peer_cache_timeout: Duration::from_secs(3),
            vote_cache_size: 1024,
            peer_cache_size: 256,
            subscribe_capacity: 1024,
        }
    }
}
