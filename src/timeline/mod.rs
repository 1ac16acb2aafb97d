//! Timeline model: event variants, the bounded ring buffer, and redaction.

pub mod event;
pub mod redact;
pub mod ring;

pub use event::{
    CheckpointEvent, DeterminismClass, GapEvent, LogEvent, LogLevel, SnapshotEvent, TimelineEvent,
    GAP_SENTINEL_SEQ,
};
pub use redact::Redactor;
pub use ring::{RingBuffer, DEFAULT_CAPACITY, MIN_CAPACITY};
