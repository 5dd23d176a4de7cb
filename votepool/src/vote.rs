// Vote value type and its syntactic validation.

use std::time::Instant;

use thiserror::Error;

/// Length of a vote event hash.
pub const EVENT_HASH_LEN: usize = 32;

/// Length of a BLS public key (compressed, min-pk variant).
pub const PUB_KEY_LEN: usize = 48;

/// Length of a BLS signature (compressed, min-pk variant).
pub const SIGNATURE_LEN: usize = 96;

/// Syntactic vote validation errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VoteError {
    #[error("invalid event hash")]
    InvalidEventHash,
    #[error("invalid event type")]
    InvalidEventType,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature length")]
    InvalidSignatureLength,
}

/// Event categories votes can be cast for.
///
/// Wire values 1 through 5 are reserved; the pool currently keeps stores for
/// 1 through 3 and rejects the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventType {
    /// Cross-chain event from the current chain to the foreign chain.
    ToForeignChain = 1,

    /// Cross-chain event from the foreign chain to the current chain.
    FromForeignChain = 2,

    /// Data availability challenge.
    DataAvailabilityChallenge = 3,

    /// Cross-chain event from the current chain to the side chain.
    ToSideChain = 4,

    /// Cross-chain event from the side chain to the current chain.
    FromSideChain = 5,
}

impl EventType {
    /// Event types the pool keeps stores for.
    pub const SUPPORTED: [EventType; 3] = [
        EventType::ToForeignChain,
        EventType::FromForeignChain,
        EventType::DataAvailabilityChallenge,
    ];

    /// Whether the pool accepts votes of this type.
    pub fn is_supported(self) -> bool {
        Self::SUPPORTED.contains(&self)
    }
}

impl TryFrom<u8> for EventType {
    type Error = VoteError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(EventType::ToForeignChain),
            2 => Ok(EventType::FromForeignChain),
            3 => Ok(EventType::DataAvailabilityChallenge),
            4 => Ok(EventType::ToSideChain),
            5 => Ok(EventType::FromSideChain),
            _ => Err(VoteError::InvalidEventType),
        }
    }
}

impl TryFrom<u32> for EventType {
    type Error = VoteError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| VoteError::InvalidEventType)
            .and_then(EventType::try_from)
    }
}

impl From<EventType> for u8 {
    fn from(event_type: EventType) -> Self {
        event_type as u8
    }
}

impl From<EventType> for u32 {
    fn from(event_type: EventType) -> Self {
        event_type as u32
    }
}

/// Identity of a vote: the byte concatenation `event_hash ‖ pub_key`.
pub type VoteKey = Vec<u8>;

/// A signed attestation from a validator about an event.
///
/// The event hash is opaque to the pool; its meaning is agreed between the
/// signers and the consumers gathering signatures.
#[derive(Debug, Clone)]
pub struct Vote {
    /// BLS public key of the signer.
    pub pub_key: Vec<u8>,

    /// BLS signature over `event_hash`.
    pub signature: Vec<u8>,

    /// Event category of the vote.
    pub event_type: EventType,

    /// The signed payload.
    pub event_hash: Vec<u8>,

    /// Pruning deadline; assigned by the pool on admission, never supplied
    /// by peers.
    pub(crate) expire_at: Instant,
}

impl Vote {
    pub fn new(pub_key: Vec<u8>, signature: Vec<u8>, event_type: EventType, event_hash: Vec<u8>) -> Self {
        Self {
            pub_key,
            signature,
            event_type,
            event_hash,
            expire_at: Instant::now(),
        }
    }

    /// Identity of the vote, used as map and cache key.
    pub fn key(&self) -> VoteKey {
        let mut key = Vec::with_capacity(self.event_hash.len() + self.pub_key.len());
        key.extend_from_slice(&self.event_hash);
        key.extend_from_slice(&self.pub_key);
        key
    }

    /// Checks field lengths and event type membership.
    pub fn validate(&self) -> Result<(), VoteError> {
        if self.event_hash.len() != EVENT_HASH_LEN {
            return Err(VoteError::InvalidEventHash);
        }
        if !self.event_type.is_supported() {
            return Err(VoteError::InvalidEventType);
        }
        if self.pub_key.len() != PUB_KEY_LEN {
            return Err(VoteError::InvalidPublicKey);
        }
        if self.signature.len() != SIGNATURE_LEN {
            return Err(VoteError::InvalidSignatureLength);
        }
        Ok(())
    }
}
