//! Adaptive recording: capture, redact, and append under load shedding.

pub mod memory;
pub mod recorder;

pub use memory::{MemoryPressureMonitor, MemorySample, MemorySampler, PressureListener};
pub use recorder::{AdaptiveRecorder, RecordingLevel, TimelineListener};
