use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::record::recorder::AdaptiveRecorder;
use crate::timeline::event::now_ms;

/// Pause recording below this available/total ratio.
pub const PAUSE_THRESHOLD: f64 = 0.15;
/// Resume recording above this ratio; the band between the two holds state.
pub const RESUME_THRESHOLD: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub available_bytes: u64,
    pub total_bytes: u64,
}

impl MemorySample {
    pub fn ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        self.available_bytes as f64 / self.total_bytes as f64
    }
}

/// Supplies memory readings. The OS integration lives in the host; tests
/// inject fixtures.
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> Option<MemorySample>;
}

pub trait PressureListener: Send + Sync {
    fn on_paused(&self, reason: &str);
    fn on_resumed(&self, paused_ms: u64);
}

/// Pauses and resumes the recorder as memory headroom shrinks and recovers.
///
/// Two inputs: polled threshold checks against the sampler, and external
/// signals from OS low-memory callbacks, which force a pause regardless of
/// the polled ratio.
pub struct MemoryPressureMonitor {
    recorder: Arc<AdaptiveRecorder>,
    sampler: Arc<dyn MemorySampler>,
    listeners: RwLock<Vec<Arc<dyn PressureListener>>>,
    paused: AtomicBool,
    paused_since_ms: AtomicU64,
    pause_count: AtomicU64,
    total_paused_ms: AtomicU64,
}

impl MemoryPressureMonitor {
    pub fn new(recorder: Arc<AdaptiveRecorder>, sampler: Arc<dyn MemorySampler>) -> Self {
        Self {
            recorder,
            sampler,
            listeners: RwLock::new(Vec::new()),
            paused: AtomicBool::new(false),
            paused_since_ms: AtomicU64::new(0),
            pause_count: AtomicU64::new(0),
            total_paused_ms: AtomicU64::new(0),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn PressureListener>) {
        self.listeners.write().push(listener);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn pause_count(&self) -> u64 {
        self.pause_count.load(Ordering::SeqCst)
    }

    pub fn total_paused_ms(&self) -> u64 {
        self.total_paused_ms.load(Ordering::SeqCst)
    }

    /// Polls the sampler once and applies the thresholds.
    pub fn poll(&self) {
        let Some(sample) = self.sampler.sample() else {
            return;
        };
        let ratio = sample.ratio();
        if ratio < PAUSE_THRESHOLD {
            self.pause("available memory below 15%");
        } else if ratio > RESUME_THRESHOLD {
            self.resume();
        }
        // Inside the hysteresis band: hold the current state.
    }

    /// OS-level low-memory signal; forces a pause even when the polled
    /// ratio looks healthy.
    pub fn on_external_pressure(&self) {
        self.pause("external low-memory signal");
    }

    fn pause(&self, reason: &str) {
        if self.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        self.paused_since_ms.store(now_ms(), Ordering::SeqCst);
        self.pause_count.fetch_add(1, Ordering::SeqCst);
        self.recorder
            .set_level(crate::record::recorder::RecordingLevel::Paused);
        tracing::warn!(reason, "recording paused under memory pressure");
        for listener in self.listeners.read().iter() {
            listener.on_paused(reason);
        }
    }

    fn resume(&self) {
        if !self.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        let since = self.paused_since_ms.load(Ordering::SeqCst);
        let paused_ms = now_ms().saturating_sub(since);
        self.total_paused_ms.fetch_add(paused_ms, Ordering::SeqCst);
        self.recorder.reset_recording_level();
        tracing::info!(paused_ms, "recording resumed");
        for listener in self.listeners.read().iter() {
            listener.on_resumed(paused_ms);
        }
    }
}
