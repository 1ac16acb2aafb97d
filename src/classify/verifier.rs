use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::replay::divergence::Divergence;
use crate::timeline::event::now_ms;

pub const HASH_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredCheckpoint {
    pub hash: [u8; HASH_LEN],
    pub ts_ms: u64,
}

/// Outcome of comparing live state against a recorded checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub is_valid: bool,
    pub divergence: Divergence,
    pub message: String,
}

/// Computes checkpoint hashes at record time and compares recorded against
/// live state at replay time.
///
/// Hashes are SHA-256 over a canonical string form of the value: JSON with
/// object keys in sorted order, a stable field-wise serialization for
/// pure-data shapes. Values that cannot be described structurally should
/// checkpoint their qualified type name instead (see `hash_type_name`), at
/// the cost of coarser divergence detection.
#[derive(Default)]
pub struct RuntimeVerifier {
    checkpoints: RwLock<HashMap<u64, StoredCheckpoint>>,
}

impl RuntimeVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical string form: serde_json keeps object keys sorted, so equal
    /// values always serialize identically.
    pub fn canonical_repr(value: &Value) -> String {
        value.to_string()
    }

    pub fn hash_value(value: &Value) -> [u8; HASH_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(Self::canonical_repr(value).as_bytes());
        hasher.finalize().into()
    }

    /// Fallback for opaque shapes: hash the qualified type name.
    pub fn hash_type_name(type_name: &str) -> [u8; HASH_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(type_name.as_bytes());
        hasher.finalize().into()
    }

    /// Records a checkpoint for `sequence_no` and returns its hash.
    pub fn create_checkpoint(&self, sequence_no: u64, state: &Value) -> [u8; HASH_LEN] {
        let hash = Self::hash_value(state);
        self.checkpoints.write().insert(
            sequence_no,
            StoredCheckpoint {
                hash,
                ts_ms: now_ms(),
            },
        );
        hash
    }

    /// Seeds a checkpoint from a recording made elsewhere, so replay can
    /// verify without having witnessed the original capture. Rejects hashes
    /// of the wrong width.
    pub fn import_checkpoint(&self, sequence_no: u64, hash: &[u8]) -> bool {
        let Ok(hash) = <[u8; HASH_LEN]>::try_from(hash) else {
            return false;
        };
        self.checkpoints.write().insert(
            sequence_no,
            StoredCheckpoint {
                hash,
                ts_ms: now_ms(),
            },
        );
        true
    }

    pub fn get_checkpoint(&self, sequence_no: u64) -> Option<StoredCheckpoint> {
        self.checkpoints.read().get(&sequence_no).copied()
    }

    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.read().len()
    }

    /// Compares live state against the checkpoint recorded for
    /// `sequence_no`. A missing checkpoint is a structural divergence: the
    /// recording claims a verification point the session cannot honor.
    pub fn verify_against_checkpoint(&self, sequence_no: u64, live: &Value) -> Verification {
        let Some(stored) = self.get_checkpoint(sequence_no) else {
            return Verification {
                is_valid: false,
                divergence: Divergence::Structural,
                message: format!("no checkpoint recorded for sequence {sequence_no}"),
            };
        };

        let live_hash = Self::hash_value(live);
        if live_hash == stored.hash {
            Verification {
                is_valid: true,
                divergence: Divergence::None,
                message: format!("checkpoint at sequence {sequence_no} matches"),
            }
        } else {
            Verification {
                is_valid: false,
                divergence: Divergence::Structural,
                message: format!("state hash mismatch at sequence {sequence_no}"),
            }
        }
    }

    pub fn clear(&self) {
        self.checkpoints.write().clear();
    }
}
