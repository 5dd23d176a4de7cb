// Vote admission verifiers: signer authorization against the active
// validator set, and stateless BLS signature verification.

use std::collections::HashMap;

use blst::min_pk::{PublicKey, Signature};
use blst::BLST_ERROR;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

use crate::vote::{Vote, PUB_KEY_LEN};

/// Ciphersuite domain separation tag for BLS12-381 G2 signatures with proof
/// of possession; must match the signing side used by relayers.
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Verification failures on the admission path.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    #[error("vote is not from validators")]
    NotFromValidator,
    #[error("invalid signature")]
    InvalidSignature,
}

/// A member of the authorized signer set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    /// Consensus address; matched when a change entry removes a validator.
    pub address: Vec<u8>,

    /// BLS public key authorizing this validator's votes. May be empty for
    /// validators that have not registered a key yet.
    pub pub_key: Vec<u8>,

    /// Voting power; zero in a change set means removal.
    pub voting_power: u64,
}

/// Thread-safe set of authorized BLS keys, kept in sync with validator set
/// updates from the event bus.
pub struct ValidatorVerifier {
    validators: RwLock<HashMap<Vec<u8>, Validator>>,
}

impl ValidatorVerifier {
    /// Creates the verifier from the bootstrap validator list. Validators
    /// without a BLS key are not authorized to vote and are skipped.
    pub fn new(bootstrap: &[Validator]) -> Self {
        let mut validators = HashMap::with_capacity(bootstrap.len());
        for validator in bootstrap {
            if !validator.pub_key.is_empty() {
                validators.insert(validator.pub_key.clone(), validator.clone());
            }
        }
        Self {
            validators: RwLock::new(validators),
        }
    }

    /// Applies a change set in order: zero voting power removes the entry
    /// with the matching consensus address, anything else upserts by BLS
    /// key. Malformed entries are skipped; surviving validators remain.
    ///
    /// The write lock is held for the whole overlay, so readers observe
    /// either the previous or the new set, never a partial one.
    pub fn apply(&self, changes: &[Validator]) {
        let mut validators = self.validators.write();
        let mut working: Vec<Validator> = validators.values().cloned().collect();
        for change in changes {
            if change.voting_power == 0 {
                working.retain(|v| v.address != change.address);
            } else if change.pub_key.len() == PUB_KEY_LEN {
                match working.iter_mut().find(|v| v.pub_key == change.pub_key) {
                    Some(existing) => *existing = change.clone(),
                    None => working.push(change.clone()),
                }
            } else {
                warn!(
                    voting_power = change.voting_power,
                    key_len = change.pub_key.len(),
                    "skipping validator update with malformed bls key"
                );
            }
        }
        validators.clear();
        for validator in working {
            validators.insert(validator.pub_key.clone(), validator);
        }
    }

    /// Succeeds iff the vote's public key is in the authorized set.
    pub fn validate(&self, vote: &Vote) -> Result<(), VerifyError> {
        if self.validators.read().contains_key(&vote.pub_key) {
            Ok(())
        } else {
            Err(VerifyError::NotFromValidator)
        }
    }

    /// Number of authorized validators.
    pub fn len(&self) -> usize {
        self.validators.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stateless BLS verification of `(pub_key, signature, event_hash)`.
pub struct BlsSignatureVerifier;

impl BlsSignatureVerifier {
    /// Succeeds iff the signature verifies over the event hash under the
    /// vote's public key.
    pub fn validate(&self, vote: &Vote) -> Result<(), VerifyError> {
        if verify_signature(&vote.event_hash, &vote.pub_key, &vote.signature) {
            Ok(())
        } else {
            Err(VerifyError::InvalidSignature)
        }
    }
}

fn verify_signature(msg: &[u8], pub_key: &[u8], signature: &[u8]) -> bool {
    let pub_key = match PublicKey::from_bytes(pub_key) {
        Ok(pub_key) => pub_key,
        Err(_) => return false,
    };
    let signature = match Signature::from_bytes(signature) {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    signature.verify(true, msg, BLS_DST, &[], &pub_key, true) == BLST_ERROR::BLST_SUCCESS
}
