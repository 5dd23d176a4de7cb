//! In-memory vote pool for BLS-signed cross-chain attestations.
//!
//! Validators sign events (cross-chain transfers, data-availability
//! challenges) and gossip the resulting votes. The pool admits votes that
//! pass syntactic validation, signer authorization and BLS verification,
//! deduplicates them, expires them on a keep-alive window and publishes
//! every admission on an event bus. The reactor fans admitted votes out to
//! peers while suppressing echoes with per-peer receive caches.
//!
//! Downstream consumers query the pool by event type (optionally by event
//! hash) until they have gathered enough signatures for a quorum; signature
//! aggregation happens outside this crate.

pub mod config;
pub mod events;
pub mod pool;
pub mod queue;
pub mod reactor;
pub mod store;
pub mod verifier;
pub mod vote;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
pub(crate) mod testutil;

pub use config::PoolConfig;
pub use events::{EventBus, EventBusError, ValidatorSetUpdate};
pub use pool::{Pool, PoolError};
pub use reactor::{
    channel_descriptor, ChannelDescriptor, Envelope, PeerHandle, Reactor, ReactorError, WireVote,
};
pub use verifier::{BlsSignatureVerifier, Validator, ValidatorVerifier};
pub use vote::{EventType, Vote, VoteError, VoteKey};
