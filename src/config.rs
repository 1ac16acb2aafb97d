use std::path::PathBuf;

use serde::Deserialize;

use crate::timeline::ring::{DEFAULT_CAPACITY, MIN_CAPACITY};

/// Agent configuration, populated by the host. The agent itself reads no
/// files and persists nothing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ring buffer capacity in events.
    pub buffer_capacity: usize,
    /// Interval for the periodic capture loop, when the host runs one.
    pub snapshot_interval_ms: u64,
    /// Per-connection IPC message budget per minute.
    pub ipc_rate_limit_per_minute: u32,
    /// Socket path for the IPC server; `None` leaves IPC disabled until
    /// the host provides one at startup.
    pub ipc_socket_path: Option<PathBuf>,
}

impl Config {
    /// Clamps out-of-range values instead of failing startup.
    pub fn normalized(mut self) -> Self {
        self.buffer_capacity = self.buffer_capacity.max(MIN_CAPACITY);
        self.snapshot_interval_ms = self.snapshot_interval_ms.max(1);
        self.ipc_rate_limit_per_minute = self.ipc_rate_limit_per_minute.max(1);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            snapshot_interval_ms: 100,
            ipc_rate_limit_per_minute: 1_000,
            ipc_socket_path: None,
        }
    }
}
