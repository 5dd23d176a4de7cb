// Peer-facing reactor: decodes inbound vote envelopes into the pool and
// fans admitted votes out to peers, suppressing echoes with per-peer
// receive caches.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use libp2p_identity::PeerId;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::events::EventBus;
use crate::pool::Pool;
use crate::vote::{EventType, Vote, VoteKey};

/// P2p channel id for vote gossip.
pub const VOTE_POOL_CHANNEL_ID: u8 = 0x70;

/// Descriptor of the vote gossip channel, for registration with the
/// embedding switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub id: u8,
    pub priority: usize,
    pub recv_message_capacity: usize,
}

pub fn channel_descriptor() -> ChannelDescriptor {
    ChannelDescriptor {
        id: VOTE_POOL_CHANNEL_ID,
        priority: 7,
        // Bigger than an encoded vote envelope.
        recv_message_capacity: 256,
    }
}

/// Protocol violations; an `Err` from [`Reactor::receive`] means the caller
/// should disconnect the offending peer.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("malformed vote pool envelope: {0}")]
    MalformedEnvelope(String),
}

/// Wire form of a vote. Field sizes and the event type range are enforced
/// when converting to a pool [`Vote`], not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireVote {
    pub pub_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub event_type: u32,
    pub event_hash: Vec<u8>,
}

impl From<&Vote> for WireVote {
    fn from(vote: &Vote) -> Self {
        Self {
            pub_key: vote.pub_key.clone(),
            signature: vote.signature.clone(),
            event_type: u32::from(vote.event_type),
            event_hash: vote.event_hash.clone(),
        }
    }
}

impl TryFrom<WireVote> for Vote {
    type Error = crate::vote::VoteError;

    fn try_from(wire: WireVote) -> Result<Self, Self::Error> {
        let event_type = EventType::try_from(wire.event_type)?;
        Ok(Vote::new(
            wire.pub_key,
            wire.signature,
            event_type,
            wire.event_hash,
        ))
    }
}

/// Envelope exchanged on the vote pool channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Envelope {
    Vote(WireVote),
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Outbound handle to a connected peer. The transport behind the sender is
/// owned by the switch; a closed channel means the peer is gone.
#[derive(Clone)]
pub struct PeerHandle {
    pub id: PeerId,
    pub sender: mpsc::Sender<Envelope>,
}

struct PeerState {
    /// Identities recently received from this peer, with the time of the
    /// last observation. Suppresses immediate echoes.
    cache: Arc<Mutex<LruCache<VoteKey, Instant>>>,
    stop: broadcast::Sender<()>,
}

struct ReactorInner {
    pool: Pool,
    event_bus: EventBus,
    peers: RwLock<HashMap<PeerId, PeerState>>,
    quit: broadcast::Sender<()>,
    config: PoolConfig,
}

/// Gossips pool votes to peers and feeds peer votes into the pool.
///
/// One instance per process; each added peer gets a broadcast task that
/// subscribes to pool updates and forwards votes the peer has not recently
/// sent us itself.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<ReactorInner>,
}

impl Reactor {
    pub fn new(pool: Pool, event_bus: EventBus, config: PoolConfig) -> Self {
        let (quit, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(ReactorInner {
                pool,
                event_bus,
                peers: RwLock::new(HashMap::new()),
                quit,
                config,
            }),
        }
    }

    /// Starts the reactor and the pool it fronts. Returns `false` if the
    /// pool was already started.
    pub fn start(&self) -> bool {
        self.inner.pool.start()
    }

    /// Stops every peer broadcast task and the pool.
    pub fn stop(&self) {
        let _ = self.inner.quit.send(());
        self.inner.peers.write().clear();
        self.inner.pool.stop();
    }

    /// Registers a peer and spawns its broadcast task.
    ///
    /// Must be called within a tokio runtime.
    pub fn add_peer(&self, peer: PeerHandle) {
        let cache_size = NonZeroUsize::new(self.inner.config.peer_cache_size.max(1)).unwrap();
        let cache = Arc::new(Mutex::new(LruCache::new(cache_size)));
        let (stop, _) = broadcast::channel(1);
        let state = PeerState {
            cache: cache.clone(),
            stop: stop.clone(),
        };
        self.inner.peers.write().insert(peer.id, state);
        // Subscribe here rather than in the task so no vote published after
        // this call can be missed.
        let votes = self.inner.event_bus.subscribe_votes();
        info!(peer = %peer.id, "vote pool peer added");
        tokio::spawn(broadcast_votes(
            self.inner.clone(),
            peer,
            cache,
            stop.subscribe(),
            votes,
        ));
    }

    /// Unregisters a peer: purges its receive cache and terminates its
    /// broadcast task, dropping the task's bus subscription.
    pub fn remove_peer(&self, peer_id: &PeerId) {
        if let Some(state) = self.inner.peers.write().remove(peer_id) {
            state.cache.lock().clear();
            let _ = state.stop.send(());
            info!(peer = %peer_id, "vote pool peer removed");
        }
    }

    /// Handles raw bytes received from `src` on the vote pool channel.
    ///
    /// Vote admission failures are logged and tolerated; an `Err` is a
    /// protocol violation and the caller should disconnect the peer.
    pub fn receive(&self, src: &PeerId, bytes: &[u8]) -> Result<(), ReactorError> {
        let envelope = Envelope::from_bytes(bytes)
            .map_err(|err| ReactorError::MalformedEnvelope(err.to_string()))?;
        match envelope {
            Envelope::Vote(wire) => {
                let vote = match Vote::try_from(wire) {
                    Ok(vote) => vote,
                    Err(err) => {
                        info!(peer = %src, %err, "could not add vote");
                        return Ok(());
                    }
                };
                let key = vote.key();
                debug!(
                    peer = %src,
                    event_hash = %hex::encode(&vote.event_hash),
                    "received vote"
                );
                // Mark the identity as seen from this peer before admission:
                // admission publishes to the bus, and the peer's broadcast
                // task must find the suppression entry already in place.
                if let Some(state) = self.inner.peers.read().get(src) {
                    state.cache.lock().put(key, Instant::now());
                }
                if let Err(err) = self.inner.pool.add(vote) {
                    info!(peer = %src, %err, "could not add vote");
                }
                Ok(())
            }
        }
    }

    /// Number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.inner.peers.read().len()
    }
}

/// Per-peer broadcast task: forwards pool updates to the peer unless the
/// peer itself delivered the vote within the cache timeout.
async fn broadcast_votes(
    inner: Arc<ReactorInner>,
    peer: PeerHandle,
    cache: Arc<Mutex<LruCache<VoteKey, Instant>>>,
    mut stop: broadcast::Receiver<()>,
    mut votes: broadcast::Receiver<Vote>,
) {
    let mut quit = inner.quit.subscribe();
    let cache_timeout = inner.config.peer_cache_timeout;
    loop {
        tokio::select! {
            received = votes.recv() => match received {
                Ok(vote) => {
                    // Send if the peer never delivered this vote, or its
                    // last delivery is old enough that a lost send should
                    // retry.
                    let send = match cache.lock().peek(&vote.key()) {
                        Some(received_at) => received_at.elapsed() > cache_timeout,
                        None => true,
                    };
                    if !send {
                        continue;
                    }
                    let envelope = Envelope::Vote(WireVote::from(&vote));
                    match peer.sender.try_send(envelope) {
                        Ok(()) => debug!(
                            peer = %peer.id,
                            event_hash = %hex::encode(&vote.event_hash),
                            "sent vote"
                        ),
                        Err(err) => debug!(peer = %peer.id, %err, "vote send dropped"),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(peer = %peer.id, skipped, "vote subscription lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = peer.sender.closed() => break,
            _ = stop.recv() => break,
            _ = quit.recv() => break,
        }
    }
    debug!(peer = %peer.id, "vote broadcast task stopped");
}
