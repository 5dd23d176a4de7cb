// In-process event bus connecting the pool to its subscribers.

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::verifier::Validator;
use crate::vote::Vote;

/// Topic carrying every vote admitted by the pool.
pub const TOPIC_VOTE_POOL_UPDATES: &str = "vote-pool-updates";

/// Topic carrying validator set change sets.
pub const TOPIC_VALIDATOR_SET_UPDATES: &str = "validator-set-updates";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EventBusError {
    #[error("no active subscribers on topic {0}")]
    NoSubscribers(&'static str),
}

/// Validator change set carried on [`TOPIC_VALIDATOR_SET_UPDATES`].
///
/// An entry with zero voting power removes the validator with the matching
/// consensus address; any other entry upserts.
#[derive(Debug, Clone)]
pub struct ValidatorSetUpdate {
    pub updates: Vec<Validator>,
}

/// Topic-split broadcast bus. Cloning shares the underlying channels;
/// dropping a receiver unsubscribes it.
#[derive(Clone)]
pub struct EventBus {
    votes: broadcast::Sender<Vote>,
    validator_updates: broadcast::Sender<ValidatorSetUpdate>,
}

impl EventBus {
    /// Creates a bus whose subscriptions buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (votes, _) = broadcast::channel(capacity.max(1));
        let (validator_updates, _) = broadcast::channel(capacity.max(1));
        Self {
            votes,
            validator_updates,
        }
    }

    /// Publishes an admitted vote, by value, to all subscribers.
    pub fn publish_vote(&self, vote: Vote) -> Result<usize, EventBusError> {
        self.votes.send(vote).map_err(|_| {
            debug!(topic = TOPIC_VOTE_POOL_UPDATES, "event dropped, no receivers");
            EventBusError::NoSubscribers(TOPIC_VOTE_POOL_UPDATES)
        })
    }

    pub fn subscribe_votes(&self) -> broadcast::Receiver<Vote> {
        self.votes.subscribe()
    }

    /// Publishes a validator change set to all subscribers.
    pub fn publish_validator_set_update(
        &self,
        update: ValidatorSetUpdate,
    ) -> Result<usize, EventBusError> {
        self.validator_updates.send(update).map_err(|_| {
            debug!(topic = TOPIC_VALIDATOR_SET_UPDATES, "event dropped, no receivers");
            EventBusError::NoSubscribers(TOPIC_VALIDATOR_SET_UPDATES)
        })
    }

    pub fn subscribe_validator_set_updates(&self) -> broadcast::Receiver<ValidatorSetUpdate> {
        self.validator_updates.subscribe()
    }

    /// Number of live vote subscribers.
    pub fn vote_subscriber_count(&self) -> usize {
        self.votes.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::PoolConfig::default().subscribe_capacity)
    }
}
