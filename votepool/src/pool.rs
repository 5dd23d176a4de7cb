// Admission pipeline and lifecycle owner for the vote pool.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::events::EventBus;
use crate::store::VoteStore;
use crate::verifier::{BlsSignatureVerifier, Validator, ValidatorVerifier, VerifyError};
use crate::vote::{EventType, Vote, VoteError, VoteKey};

/// Errors surfaced by the admission pipeline and queries.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error(transparent)]
    Vote(#[from] VoteError),
    #[error("unsupported event type")]
    UnsupportedEventType,
    #[error("vote is not from validators")]
    NotFromValidator,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("vote pool is not running")]
    NotRunning,
}

impl From<VerifyError> for PoolError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::NotFromValidator => PoolError::NotFromValidator,
            VerifyError::InvalidSignature => PoolError::InvalidSignature,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ServiceState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl From<u8> for ServiceState {
    fn from(value: u8) -> Self {
        match value {
            0 => ServiceState::Created,
            1 => ServiceState::Running,
            2 => ServiceState::Stopping,
            _ => ServiceState::Stopped,
        }
    }
}

struct PoolInner {
    stores: HashMap<EventType, VoteStore>,
    cache: Mutex<LruCache<VoteKey, ()>>,
    validator_verifier: ValidatorVerifier,
    signature_verifier: BlsSignatureVerifier,
    event_bus: EventBus,
    config: PoolConfig,
    state: AtomicU8,
    quit: broadcast::Sender<()>,
}

/// In-memory pool of validator votes, one store per supported event type.
///
/// Only verified votes enter a store: the admission pipeline checks syntax,
/// signer authorization and the BLS signature, then publishes every newly
/// admitted vote on the event bus. A background pruner evicts votes past
/// their keep-alive deadline, and a subscriber task keeps the authorized
/// signer set in sync with validator set updates.
///
/// `Pool` is a cheap clone around shared state; background tasks hold
/// clones rather than back-references.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates a pool with the given bootstrap validators. The pool is in
    /// the created state; call [`Pool::start`] to begin serving.
    pub fn new(validators: &[Validator], event_bus: EventBus, config: PoolConfig) -> Self {
        let mut stores = HashMap::with_capacity(EventType::SUPPORTED.len());
        for event_type in EventType::SUPPORTED {
            stores.insert(event_type, VoteStore::new());
        }
        let cache_size = NonZeroUsize::new(config.vote_cache_size.max(1)).unwrap();
        let (quit, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(PoolInner {
                stores,
                cache: Mutex::new(LruCache::new(cache_size)),
                validator_verifier: ValidatorVerifier::new(validators),
                signature_verifier: BlsSignatureVerifier,
                event_bus,
                config,
                state: AtomicU8::new(ServiceState::Created as u8),
                quit,
            }),
        }
    }

    fn state(&self) -> ServiceState {
        ServiceState::from(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Starts the prune ticker and the validator-update subscriber.
    /// Returns `false` if the pool was already started.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&self) -> bool {
        let transitioned = self
            .inner
            .state
            .compare_exchange(
                ServiceState::Created as u8,
                ServiceState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !transitioned {
            warn!("vote pool already started");
            return false;
        }
        // Subscribe before spawning so no update published after this call
        // can be missed.
        let updates = self.inner.event_bus.subscribe_validator_set_updates();
        tokio::spawn(self.clone().prune_routine());
        tokio::spawn(self.clone().validator_update_routine(updates));
        info!(validators = self.validator_count(), "vote pool started");
        true
    }

    /// Signals background tasks to stop. In-flight admissions complete; new
    /// calls fail with [`PoolError::NotRunning`].
    pub fn stop(&self) {
        let transitioned = self
            .inner
            .state
            .compare_exchange(
                ServiceState::Running as u8,
                ServiceState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !transitioned {
            return;
        }
        let _ = self.inner.quit.send(());
        self.inner
            .state
            .store(ServiceState::Stopped as u8, Ordering::Release);
        info!("vote pool stopped");
    }

    /// Admits a vote: syntactic validation, dedup, signer authorization,
    /// BLS verification, store insertion, event publication.
    ///
    /// Re-submitting a recently admitted identity returns `Ok` without
    /// re-verifying, re-storing or re-publishing.
    pub fn add(&self, mut vote: Vote) -> Result<(), PoolError> {
        if !self.is_running() {
            return Err(PoolError::NotRunning);
        }
        vote.validate()?;
        let store = self
            .inner
            .stores
            .get(&vote.event_type)
            .ok_or(PoolError::UnsupportedEventType)?;

        let key = vote.key();
        if self.inner.cache.lock().contains(&key) {
            return Ok(());
        }

        self.inner.validator_verifier.validate(&vote)?;
        self.inner.signature_verifier.validate(&vote)?;

        vote.expire_at = Instant::now() + self.inner.config.keep_alive;
        store.add(vote.clone());

        debug!(
            event_hash = %hex::encode(&vote.event_hash),
            event_type = ?vote.event_type,
            "vote added"
        );
        if let Err(err) = self.inner.event_bus.publish_vote(vote) {
            warn!(%err, "cannot publish vote pool update");
        }
        self.inner.cache.lock().put(key, ());
        Ok(())
    }

    /// Snapshot of votes for one event type and hash. Includes votes that
    /// have expired but not yet been pruned.
    pub fn by_type_and_hash(
        &self,
        event_type: EventType,
        event_hash: &[u8],
    ) -> Result<Vec<Vote>, PoolError> {
        if !self.is_running() {
            return Err(PoolError::NotRunning);
        }
        let store = self
            .inner
            .stores
            .get(&event_type)
            .ok_or(PoolError::UnsupportedEventType)?;
        Ok(store.by_hash(event_hash))
    }

    /// Snapshot of all votes for one event type.
    pub fn by_type(&self, event_type: EventType) -> Result<Vec<Vote>, PoolError> {
        if !self.is_running() {
            return Err(PoolError::NotRunning);
        }
        let store = self
            .inner
            .stores
            .get(&event_type)
            .ok_or(PoolError::UnsupportedEventType)?;
        Ok(store.all())
    }

    /// Clears every store and purges the dedup cache.
    pub fn flush(&self) -> Result<(), PoolError> {
        if !self.is_running() {
            return Err(PoolError::NotRunning);
        }
        for store in self.inner.stores.values() {
            store.flush();
        }
        self.inner.cache.lock().clear();
        Ok(())
    }

    /// Number of currently authorized validators.
    pub fn validator_count(&self) -> usize {
        self.inner.validator_verifier.len()
    }

    /// Periodically evicts expired votes and reclaims their dedup entries,
    /// so a vote re-emitted after expiry is admitted and broadcast again.
    async fn prune_routine(self) {
        let mut quit = self.inner.quit.subscribe();
        let period = self.inner.config.prune_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for store in self.inner.stores.values() {
                        let keys = store.prune(Instant::now());
                        if keys.is_empty() {
                            continue;
                        }
                        let mut cache = self.inner.cache.lock();
                        for key in &keys {
                            cache.pop(key);
                        }
                        drop(cache);
                        debug!(pruned = keys.len(), "pruned expired votes");
                    }
                }
                _ = quit.recv() => return,
            }
        }
    }

    /// Applies validator set updates from the event bus until the
    /// subscription closes or the pool stops.
    async fn validator_update_routine(
        self,
        mut updates: broadcast::Receiver<crate::events::ValidatorSetUpdate>,
    ) {
        let mut quit = self.inner.quit.subscribe();
        loop {
            tokio::select! {
                received = updates.recv() => match received {
                    Ok(update) => {
                        self.inner.validator_verifier.apply(&update.updates);
                        info!(
                            changes = update.updates.len(),
                            validators = self.validator_count(),
                            "validators updated"
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "validator update subscription lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                _ = quit.recv() => return,
            }
        }
    }
}
