// Shared fixtures for unit and integration tests.

use std::time::Duration;

use blst::min_pk::SecretKey;
use rand::RngCore;

use crate::config::PoolConfig;
use crate::verifier::{Validator, BLS_DST};
use crate::vote::{EventType, Vote};

/// Generates a fresh BLS secret key.
pub fn bls_key() -> SecretKey {
    let mut ikm = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut ikm);
    SecretKey::key_gen(&ikm, &[]).expect("ikm is long enough")
}

/// Compressed public key bytes for a secret key.
pub fn pub_key_bytes(key: &SecretKey) -> Vec<u8> {
    key.sk_to_pk().to_bytes().to_vec()
}

/// A validator record with a random consensus address.
pub fn make_validator(key: &SecretKey, voting_power: u64) -> Validator {
    let mut address = vec![0u8; 20];
    rand::thread_rng().fill_bytes(&mut address);
    Validator {
        address,
        pub_key: pub_key_bytes(key),
        voting_power,
    }
}

/// A vote over `event_hash` correctly signed by `key`.
pub fn signed_vote(key: &SecretKey, event_type: EventType, event_hash: &[u8]) -> Vote {
    let signature = key.sign(event_hash, BLS_DST, &[]).to_bytes().to_vec();
    Vote::new(
        pub_key_bytes(key),
        signature,
        event_type,
        event_hash.to_vec(),
    )
}

/// Decodes a hex event hash constant.
pub fn event_hash(hex_str: &str) -> Vec<u8> {
    hex::decode(hex_str).expect("valid hex literal")
}

/// A config with windows short enough for expiry tests to run in
/// milliseconds.
pub fn test_config() -> PoolConfig {
    PoolConfig {
        keep_alive: Duration::from_millis(100),
        prune_interval: Duration::from_millis(30),
        peer_cache_timeout: Duration::from_millis(150),
        vote_cache_size: 64,
        peer_cache_size: 16,
        subscribe_capacity: 64,
    }
}
