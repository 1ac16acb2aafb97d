//! Multi-process coordination: HMAC process tokens, signed cross-process
//! events, and the synchronization check.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::timeline::event::now_ms;

type HmacSha256 = Hmac<Sha256>;

/// Processes are considered synchronized while their replay positions stay
/// within this many sequence numbers of each other.
pub const SYNC_WINDOW: u64 = 100;

#[derive(Debug, Error)]
pub enum CoordError {
    /// Presented token does not match the stored token for this pid.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("process {0} is not registered")]
    UnknownProcess(u32),

    /// Event signature did not verify; the event is dropped.
    #[error("invalid event signature")]
    InvalidSignature,
}

/// Per-process replay position, as last reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessState {
    pub pid: u32,
    pub process_name: String,
    pub is_replaying: bool,
    pub last_sequence_no: u64,
}

/// An event published across process boundaries, authenticated by HMAC
/// rather than shared memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossProcessEvent {
    pub pid: u32,
    pub sequence_no: u64,
    pub event_type: String,
    pub signature: Vec<u8>,
}

struct ProcessEntry {
    state: ProcessState,
    token: [u8; 32],
}

/// Tracks participating processes under one shared secret, generated once
/// per coordinator.
pub struct ProcessCoordinator {
    secret: [u8; 32],
    processes: RwLock<HashMap<u32, ProcessEntry>>,
    coordinator_pid: Mutex<Option<u32>>,
    inbox: Mutex<Vec<CrossProcessEvent>>,
}

impl ProcessCoordinator {
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self {
            secret,
            processes: RwLock::new(HashMap::new()),
            coordinator_pid: Mutex::new(None),
            inbox: Mutex::new(Vec::new()),
        }
    }

    /// Registers a process and returns its authentication token: an
    /// HMAC-SHA-256 over `{pid}:{name}:{minute_bucket}`. Re-registering a
    /// pid rotates its token.
    pub fn register_process(&self, pid: u32, name: &str) -> Vec<u8> {
        let minute_bucket = now_ms() / 1000 / 60;
        let token = self.hmac(format!("{pid}:{name}:{minute_bucket}").as_bytes());
        self.processes.write().insert(
            pid,
            ProcessEntry {
                state: ProcessState {
                    pid,
                    process_name: name.to_string(),
                    is_replaying: false,
                    last_sequence_no: 0,
                },
                token,
            },
        );
        tracing::debug!(pid, "process registered with coordinator");
        token.to_vec()
    }

    /// Marks the caller as coordinator. Idempotent; a second caller takes
    /// over only if no coordinator is set.
    pub fn become_coordinator(&self, pid: u32) -> bool {
        let mut coordinator = self.coordinator_pid.lock();
        match *coordinator {
            Some(existing) => existing == pid,
            None => {
                *coordinator = Some(pid);
                true
            }
        }
    }

    pub fn coordinator_pid(&self) -> Option<u32> {
        *self.coordinator_pid.lock()
    }

    pub fn get_process(&self, pid: u32) -> Option<ProcessState> {
        self.processes.read().get(&pid).map(|e| e.state.clone())
    }

    pub fn process_count(&self) -> usize {
        self.processes.read().len()
    }

    /// Updates a process's replay position. The presented token must match
    /// the stored token byte-for-byte; the comparison is constant-time.
    pub fn update_replay_state(
        &self,
        pid: u32,
        is_replaying: bool,
        last_sequence_no: u64,
        token: &[u8],
    ) -> Result<(), CoordError> {
        let mut processes = self.processes.write();
        let entry = processes
            .get_mut(&pid)
            .ok_or(CoordError::UnknownProcess(pid))?;

        if !token_matches(&entry.token, token) {
            tracing::warn!(pid, "replay state update rejected: token mismatch");
            return Err(CoordError::AuthenticationFailed);
        }

        entry.state.is_replaying = is_replaying;
        entry.state.last_sequence_no = last_sequence_no;
        Ok(())
    }

    /// Whether every registered process sits inside the sync window.
    pub fn are_processes_synchronized(&self) -> bool {
        let processes = self.processes.read();
        let mut seqs = processes.values().map(|e| e.state.last_sequence_no);
        let Some(first) = seqs.next() else {
            return true;
        };
        let (min, max) = seqs.fold((first, first), |(min, max), seq| {
            (min.min(seq), max.max(seq))
        });
        max - min <= SYNC_WINDOW
    }

    /// Builds a signed event for publication to other processes.
    pub fn sign_event(&self, pid: u32, sequence_no: u64, event_type: &str) -> CrossProcessEvent {
        let signature = self
            .hmac(event_payload(pid, sequence_no, event_type).as_bytes())
            .to_vec();
        CrossProcessEvent {
            pid,
            sequence_no,
            event_type: event_type.to_string(),
            signature,
        }
    }

    /// Accepts an event if its signature verifies; otherwise drops it.
    /// Verified events advance the sender's known replay position.
    pub fn receive_event(&self, event: CrossProcessEvent) -> Result<(), CoordError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key size");
        mac.update(event_payload(event.pid, event.sequence_no, &event.event_type).as_bytes());
        if mac.verify_slice(&event.signature).is_err() {
            tracing::warn!(pid = event.pid, "cross-process event dropped: bad signature");
            return Err(CoordError::InvalidSignature);
        }

        if let Some(entry) = self.processes.write().get_mut(&event.pid) {
            entry.state.last_sequence_no = entry.state.last_sequence_no.max(event.sequence_no);
        }
        self.inbox.lock().push(event);
        Ok(())
    }

    /// Verified events received so far.
    pub fn received_events(&self) -> Vec<CrossProcessEvent> {
        self.inbox.lock().clone()
    }

    fn hmac(&self, payload: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key size");
        mac.update(payload);
        mac.finalize().into_bytes().into()
    }
}

impl Default for ProcessCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn event_payload(pid: u32, sequence_no: u64, event_type: &str) -> String {
    format!("{pid}:{sequence_no}:{event_type}")
}

fn token_matches(stored: &[u8; 32], presented: &[u8]) -> bool {
    if presented.len() != stored.len() {
        return false;
    }
    stored.ct_eq(presented).into()
}
