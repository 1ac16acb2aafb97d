use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for the peripheral failure paths that must not halt recording,
/// plus recording throughput.
#[derive(Debug, Default)]
pub struct AgentMetrics {
    events_recorded: AtomicU64,
    events_dropped: AtomicU64,
    capture_errors: AtomicU64,
    serialization_errors: AtomicU64,
    auth_failures: AtomicU64,
    rate_limit_closes: AtomicU64,
    blocked_operations: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_recorded: u64,
    pub events_dropped: u64,
    pub capture_errors: u64,
    pub serialization_errors: u64,
    pub auth_failures: u64,
    pub rate_limit_closes: u64,
    pub blocked_operations: u64,
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_events_recorded(&self) {
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_events_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_capture_errors(&self) {
        self.capture_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_serialization_errors(&self) {
        self.serialization_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_auth_failures(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_rate_limit_closes(&self) {
        self.rate_limit_closes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_blocked_operations(&self) {
        self.blocked_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            serialization_errors: self.serialization_errors.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            rate_limit_closes: self.rate_limit_closes.load(Ordering::Relaxed),
            blocked_operations: self.blocked_operations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = AgentMetrics::new();
        metrics.incr_events_recorded();
        metrics.incr_events_recorded();
        metrics.incr_capture_errors();
        let snap = metrics.snapshot();
        assert_eq!(snap.events_recorded, 2);
        assert_eq!(snap.capture_errors, 1);
        assert_eq!(snap.events_dropped, 0);
    }
}
