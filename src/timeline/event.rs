use serde::{Deserialize, Serialize};

/// Sequence number carried by gap markers synthesized inside the ring buffer.
/// Recorder-assigned sequence numbers are strictly monotonic and never reach it.
pub const GAP_SENTINEL_SEQ: u64 = u64::MAX;

/// How much a source's value can be trusted to reproduce during replay.
///
/// Variants are ordered by safety: `Guaranteed` sorts before `Verifiable`,
/// which sorts before `Conditional`, which sorts before `Unsafe`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DeterminismClass {
    /// Pure immutable data: primitives, tagged unions, immutable collections.
    Guaranteed,
    /// Observable state holders whose value is checkable at runtime.
    Verifiable,
    /// Isolated subsystem attested by the developer with a reason.
    Conditional,
    /// Anything touching I/O, clocks, randomness, or the network.
    Unsafe,
}

impl DeterminismClass {
    /// Base score contribution used by the determinism scorer.
    pub fn base_weight(self) -> u8 {
        match self {
            DeterminismClass::Guaranteed => 100,
            DeterminismClass::Verifiable => 85,
            DeterminismClass::Conditional => 60,
            DeterminismClass::Unsafe => 0,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            DeterminismClass::Guaranteed => "guaranteed",
            DeterminismClass::Verifiable => "verifiable",
            DeterminismClass::Conditional => "conditional",
            DeterminismClass::Unsafe => "unsafe",
        }
    }
}

impl std::fmt::Display for DeterminismClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A recorded observation of one source's value at a sequence number.
///
/// `value_bytes` and `checkpoint_hash` are copied on construction and on
/// read, so no caller can mutate a payload after it has been appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEvent {
    pub ts_ms: u64,
    pub sequence_no: u64,
    pub thread_name: String,
    pub source_id: String,
    pub class: DeterminismClass,
    pub value_type_name: String,
    value_bytes: Vec<u8>,
    checkpoint_hash: Option<Vec<u8>>,
}

impl SnapshotEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ts_ms: u64,
        sequence_no: u64,
        thread_name: impl Into<String>,
        source_id: impl Into<String>,
        class: DeterminismClass,
        value_type_name: impl Into<String>,
        value_bytes: &[u8],
        checkpoint_hash: Option<&[u8]>,
    ) -> Self {
        Self {
            ts_ms,
            sequence_no,
            thread_name: thread_name.into(),
            source_id: source_id.into(),
            class,
            value_type_name: value_type_name.into(),
            value_bytes: value_bytes.to_vec(),
            checkpoint_hash: checkpoint_hash.map(<[u8]>::to_vec),
        }
    }

    pub fn value_bytes(&self) -> Vec<u8> {
        self.value_bytes.clone()
    }

    pub fn checkpoint_hash(&self) -> Option<Vec<u8>> {
        self.checkpoint_hash.clone()
    }
}

// Snapshot identity is (sequence_no, source_id, value_bytes); timestamps and
// thread names are best-effort and excluded.
impl PartialEq for SnapshotEvent {
    fn eq(&self, other: &Self) -> bool {
        self.sequence_no == other.sequence_no
            && self.source_id == other.source_id
            && self.value_bytes == other.value_bytes
    }
}

impl Eq for SnapshotEvent {}

/// A recorded hash for replay-time verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEvent {
    pub ts_ms: u64,
    pub sequence_no: u64,
    pub thread_name: String,
    pub checkpoint_id: String,
    pub state_hash: Vec<u8>,
    pub source_count: u32,
}

/// A marker for intentionally missed events (overflow or degradation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapEvent {
    pub ts_ms: u64,
    pub sequence_no: u64,
    pub thread_name: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missed_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl GapEvent {
    pub const OVERFLOW_REASON: &'static str = "buffer overflow";

    /// Marker synthesized when the ring buffer discards an event.
    pub fn overflow(ts_ms: u64, thread_name: impl Into<String>) -> Self {
        Self {
            ts_ms,
            sequence_no: GAP_SENTINEL_SEQ,
            thread_name: thread_name.into(),
            reason: Self::OVERFLOW_REASON.to_string(),
            missed_count: Some(1),
            duration_ms: None,
        }
    }

    pub fn is_overflow(&self) -> bool {
        self.reason == Self::OVERFLOW_REASON
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts_ms: u64,
    pub sequence_no: u64,
    pub thread_name: String,
    pub level: LogLevel,
    pub tag: String,
    pub message: String,
}

/// Everything the recorder can place on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEvent {
    Snapshot(SnapshotEvent),
    Checkpoint(CheckpointEvent),
    Gap(GapEvent),
    Log(LogEvent),
}

impl TimelineEvent {
    pub fn sequence_no(&self) -> u64 {
        match self {
            TimelineEvent::Snapshot(ev) => ev.sequence_no,
            TimelineEvent::Checkpoint(ev) => ev.sequence_no,
            TimelineEvent::Gap(ev) => ev.sequence_no,
            TimelineEvent::Log(ev) => ev.sequence_no,
        }
    }

    pub fn ts_ms(&self) -> u64 {
        match self {
            TimelineEvent::Snapshot(ev) => ev.ts_ms,
            TimelineEvent::Checkpoint(ev) => ev.ts_ms,
            TimelineEvent::Gap(ev) => ev.ts_ms,
            TimelineEvent::Log(ev) => ev.ts_ms,
        }
    }

    pub fn event_type_name(&self) -> &'static str {
        match self {
            TimelineEvent::Snapshot(_) => "Snapshot",
            TimelineEvent::Checkpoint(_) => "Checkpoint",
            TimelineEvent::Gap(_) => "Gap",
            TimelineEvent::Log(_) => "Log",
        }
    }
}

/// Current wall time in epoch milliseconds. Best-effort; may be
/// non-monotonic across threads.
pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Name of the calling thread, for event attribution.
pub(crate) fn current_thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or("unnamed")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_ordering_tracks_safety() {
        assert!(DeterminismClass::Guaranteed < DeterminismClass::Verifiable);
        assert!(DeterminismClass::Verifiable < DeterminismClass::Conditional);
        assert!(DeterminismClass::Conditional < DeterminismClass::Unsafe);
    }

    #[test]
    fn snapshot_equality_ignores_timestamp_and_thread() {
        let a = SnapshotEvent::new(
            1,
            7,
            "main",
            "cart",
            DeterminismClass::Guaranteed,
            "Cart",
            b"{}",
            None,
        );
        let b = SnapshotEvent::new(
            999,
            7,
            "worker-3",
            "cart",
            DeterminismClass::Guaranteed,
            "Cart",
            b"{}",
            None,
        );
        assert_eq!(a, b);

        let c = SnapshotEvent::new(
            1,
            7,
            "main",
            "cart",
            DeterminismClass::Guaranteed,
            "Cart",
            b"{\"n\":1}",
            None,
        );
        assert_ne!(a, c);
    }

    #[test]
    fn snapshot_payload_reads_are_copies() {
        let ev = SnapshotEvent::new(
            1,
            1,
            "main",
            "s",
            DeterminismClass::Guaranteed,
            "T",
            b"abc",
            Some(b"hash"),
        );
        let mut bytes = ev.value_bytes();
        bytes[0] = b'z';
        assert_eq!(ev.value_bytes(), b"abc");
        assert_eq!(ev.checkpoint_hash().as_deref(), Some(b"hash".as_slice()));
    }

    #[test]
    fn event_serde_roundtrip() {
        let ev = TimelineEvent::Gap(GapEvent::overflow(42, "main"));
        let json = serde_json::to_string(&ev).unwrap();
        let back: TimelineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
        assert!(json.contains("\"type\":\"gap\""));
    }
}
