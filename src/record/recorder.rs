use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::verifier::RuntimeVerifier;
use crate::metrics::AgentMetrics;
use crate::source::{SourceRegistry, StateSource};
use crate::timeline::event::{current_thread_name, now_ms, GapEvent, SnapshotEvent};
use crate::timeline::{DeterminismClass, Redactor, RingBuffer, TimelineEvent};

/// How much the recorder currently captures. Demotion is one-way within a
/// second bucket; only `reset_recording_level` restores `Full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingLevel {
    Full,
    Reduced,
    Minimal,
    Paused,
}

impl RecordingLevel {
    fn from_bits(bits: u64) -> Self {
        match bits & 0b11 {
            0 => RecordingLevel::Full,
            1 => RecordingLevel::Reduced,
            2 => RecordingLevel::Minimal,
            _ => RecordingLevel::Paused,
        }
    }

    fn bits(self) -> u64 {
        match self {
            RecordingLevel::Full => 0,
            RecordingLevel::Reduced => 1,
            RecordingLevel::Minimal => 2,
            RecordingLevel::Paused => 3,
        }
    }

    /// Whether a source of this class is captured at this level.
    fn permits(self, class: DeterminismClass) -> bool {
        match self {
            RecordingLevel::Full => true,
            RecordingLevel::Reduced => class <= DeterminismClass::Verifiable,
            RecordingLevel::Minimal => class == DeterminismClass::Guaranteed,
            RecordingLevel::Paused => false,
        }
    }
}

/// Observes every event the recorder emits.
pub trait TimelineListener: Send + Sync {
    fn on_event(&self, event: &TimelineEvent);
}

// Recording state packed into one atomic cell:
// bits 0..=1 level, bits 2..=23 events this second, bits 24..=63 second bucket.
const COUNT_SHIFT: u64 = 2;
const COUNT_MASK: u64 = (1 << 22) - 1;
const BUCKET_SHIFT: u64 = 24;

fn pack(level: RecordingLevel, count: u64, bucket: u64) -> u64 {
    level.bits() | ((count & COUNT_MASK) << COUNT_SHIFT) | (bucket << BUCKET_SHIFT)
}

fn unpack(state: u64) -> (RecordingLevel, u64, u64) {
    (
        RecordingLevel::from_bits(state),
        (state >> COUNT_SHIFT) & COUNT_MASK,
        state >> BUCKET_SHIFT,
    )
}

/// Millisecond wall-clock source; injectable so tests control time.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Captures source state into the ring buffer, shedding load through the
/// degradation ladder Full → Reduced → Minimal → Paused.
pub struct AdaptiveRecorder {
    buffer: Arc<RingBuffer>,
    redactor: Redactor,
    verifier: Option<Arc<RuntimeVerifier>>,
    metrics: Arc<AgentMetrics>,
    /// Level + per-second counter + bucket, mutated only via CAS.
    state: AtomicU64,
    seq: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn TimelineListener>>>,
    clock: Clock,
}

impl AdaptiveRecorder {
    pub fn new(buffer: Arc<RingBuffer>, metrics: Arc<AgentMetrics>) -> Self {
        Self::with_clock(buffer, metrics, Arc::new(now_ms))
    }

    /// Recorder with an injected clock, for hosts that control time in tests.
    pub fn with_clock(buffer: Arc<RingBuffer>, metrics: Arc<AgentMetrics>, clock: Clock) -> Self {
        Self {
            buffer,
            redactor: Redactor::new(),
            verifier: None,
            metrics,
            state: AtomicU64::new(pack(RecordingLevel::Full, 0, 0)),
            seq: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
            clock,
        }
    }

    /// Attach a verifier; Verifiable-class snapshots then carry checkpoint
    /// hashes for replay-time verification.
    pub fn with_verifier(mut self, verifier: Arc<RuntimeVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn TimelineListener>) {
        self.listeners.write().push(listener);
    }

    pub fn buffer(&self) -> &Arc<RingBuffer> {
        &self.buffer
    }

    pub fn current_level(&self) -> RecordingLevel {
        unpack(self.state.load(Ordering::SeqCst)).0
    }

    /// Events counted in the current second bucket.
    pub fn events_this_second(&self) -> u64 {
        unpack(self.state.load(Ordering::SeqCst)).1
    }

    /// Forces a level, outside the ladder. Used by the host facade and the
    /// memory pressure monitor.
    pub fn set_level(&self, level: RecordingLevel) {
        loop {
            let cur = self.state.load(Ordering::SeqCst);
            let (_, count, bucket) = unpack(cur);
            let next = pack(level, count, bucket);
            if self
                .state
                .compare_exchange(cur, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Restores `Full` after demotion or an external pause.
    pub fn reset_recording_level(&self) {
        self.set_level(RecordingLevel::Full);
    }

    /// Captures one source. Returns whether a snapshot landed on the
    /// timeline. Failures in capture or serialization are counted and
    /// swallowed; recording continues.
    pub fn record(&self, source: &dyn StateSource) -> bool {
        let ts = (self.clock)();
        let (level, demotion) = self.tick(ts / 1000);

        if let Some(reason) = demotion {
            self.emit_gap(ts, reason);
        }

        let class = source.determinism_class();
        if !level.permits(class) {
            self.metrics.incr_events_dropped();
            return false;
        }

        let value = match source.capture_state() {
            Ok(value) => value,
            Err(err) => {
                self.metrics.incr_capture_errors();
                tracing::debug!(error = %err, "state capture failed");
                return false;
            }
        };

        let value = prepare_captured_value(source, value, &self.redactor);
        let bytes = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.metrics.incr_serialization_errors();
                tracing::debug!(error = %err, "snapshot serialization failed");
                return false;
            }
        };

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let checkpoint_hash = match (&self.verifier, class) {
            (Some(verifier), DeterminismClass::Verifiable) => {
                Some(verifier.create_checkpoint(seq, &value).to_vec())
            }
            _ => None,
        };

        let event = TimelineEvent::Snapshot(SnapshotEvent::new(
            ts,
            seq,
            current_thread_name(),
            source.source_id(),
            class,
            source.type_profile().type_name,
            &bytes,
            checkpoint_hash.as_deref(),
        ));

        self.buffer.append(event.clone());
        self.metrics.incr_events_recorded();
        self.notify(&event);
        true
    }

    /// Captures every registered source once.
    pub fn record_all(&self, registry: &SourceRegistry) -> usize {
        registry
            .get_all()
            .iter()
            .filter(|source| self.record(source.as_ref()))
            .count()
    }

    /// Advances the per-second counter and applies the degradation ladder.
    /// Returns the level in effect and, when this call demoted, the gap
    /// reason to emit.
    fn tick(&self, bucket: u64) -> (RecordingLevel, Option<&'static str>) {
        loop {
            let cur = self.state.load(Ordering::SeqCst);
            let (level, count, cur_bucket) = unpack(cur);

            let (new_level, new_count, demotion) = if cur_bucket != bucket {
                (level, 1, None)
            } else {
                let count = (count + 1).min(COUNT_MASK);
                if count > 1_000 && level < RecordingLevel::Paused {
                    (
                        RecordingLevel::Paused,
                        count,
                        Some("Event rate exceeded 1000/s"),
                    )
                } else if count > 500 && level < RecordingLevel::Minimal {
                    (
                        RecordingLevel::Minimal,
                        count,
                        Some("Event rate exceeded 500/s"),
                    )
                } else if count > 200 && level < RecordingLevel::Reduced {
                    (
                        RecordingLevel::Reduced,
                        count,
                        Some("Event rate exceeded 200/s"),
                    )
                } else {
                    (level, count, None)
                }
            };

            let next = pack(new_level, new_count, bucket);
            if self
                .state
                .compare_exchange(cur, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return (new_level, demotion);
            }
        }
    }

    fn emit_gap(&self, ts: u64, reason: &str) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let event = TimelineEvent::Gap(GapEvent {
            ts_ms: ts,
            sequence_no: seq,
            thread_name: current_thread_name(),
            reason: reason.to_string(),
            missed_count: None,
            duration_ms: None,
        });
        self.buffer.append(event.clone());
        self.notify(&event);
    }

    fn notify(&self, event: &TimelineEvent) {
        for listener in self.listeners.read().iter() {
            listener.on_event(event);
        }
    }
}

/// Applies developer field tags, then the redaction strategy. Shared by the
/// recorder and the replay controller so recorded and live values are
/// prepared identically.
pub(crate) fn prepare_captured_value(
    source: &dyn StateSource,
    mut value: Value,
    redactor: &Redactor,
) -> Value {
    let tags = source.tags();
    if let Value::Object(map) = &mut value {
        for field in tags.ignored_fields() {
            map.remove(field);
        }
        for field in tags.redacted_fields() {
            if map.contains_key(field) {
                map.insert(field.to_string(), Value::String("[REDACTED]".to_string()));
            }
        }
    }
    redactor.redact(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tags::{SourceTag, TagSet};
    use crate::source::testing::{FailingSource, FixedSource};
    use parking_lot::Mutex;
    use serde_json::json;

    fn fixed_clock(ms: u64) -> Clock {
        Arc::new(move || ms)
    }

    fn recorder_at(ms: u64) -> AdaptiveRecorder {
        AdaptiveRecorder::with_clock(
            Arc::new(RingBuffer::with_capacity(10_000)),
            Arc::new(AgentMetrics::new()),
            fixed_clock(ms),
        )
    }

    struct CollectingListener(Mutex<Vec<TimelineEvent>>);

    impl TimelineListener for CollectingListener {
        fn on_event(&self, event: &TimelineEvent) {
            self.0.lock().push(event.clone());
        }
    }

    #[test]
    fn records_snapshot_with_monotonic_sequences() {
        let recorder = recorder_at(5_000);
        let source = FixedSource::guaranteed("cart", json!({"n": 1}));
        assert!(recorder.record(&source));
        assert!(recorder.record(&source));

        let events = recorder.buffer().get_all();
        assert_eq!(events.len(), 2);
        let seqs: Vec<u64> = events.iter().map(TimelineEvent::sequence_no).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn degradation_ladder_demotes_in_order() {
        let recorder = recorder_at(5_000);
        let listener = Arc::new(CollectingListener(Mutex::new(Vec::new())));
        recorder.add_listener(listener.clone());
        let source = FixedSource::guaranteed("cart", json!(1));

        for _ in 0..201 {
            recorder.record(&source);
        }
        assert_eq!(recorder.current_level(), RecordingLevel::Reduced);
        let gaps: Vec<String> = listener
            .0
            .lock()
            .iter()
            .filter_map(|ev| match ev {
                TimelineEvent::Gap(gap) => Some(gap.reason.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(gaps, vec!["Event rate exceeded 200/s".to_string()]);

        for _ in 0..300 {
            recorder.record(&source);
        }
        assert_eq!(recorder.current_level(), RecordingLevel::Minimal);

        for _ in 0..500 {
            recorder.record(&source);
        }
        assert_eq!(recorder.current_level(), RecordingLevel::Paused);

        recorder.reset_recording_level();
        assert_eq!(recorder.current_level(), RecordingLevel::Full);
    }

    #[test]
    fn bucket_rollover_resets_counter_but_keeps_level() {
        let ms = Arc::new(AtomicU64::new(5_000));
        let clock: Clock = {
            let ms = ms.clone();
            Arc::new(move || ms.load(Ordering::SeqCst))
        };
        let recorder = AdaptiveRecorder::with_clock(
            Arc::new(RingBuffer::with_capacity(10_000)),
            Arc::new(AgentMetrics::new()),
            clock,
        );
        let source = FixedSource::guaranteed("cart", json!(1));

        for _ in 0..250 {
            recorder.record(&source);
        }
        assert_eq!(recorder.current_level(), RecordingLevel::Reduced);

        // Next second: counter resets, level does not recover on its own.
        ms.store(6_000, Ordering::SeqCst);
        recorder.record(&source);
        assert_eq!(recorder.events_this_second(), 1);
        assert_eq!(recorder.current_level(), RecordingLevel::Reduced);
    }

    #[test]
    fn reduced_skips_conditional_minimal_keeps_guaranteed() {
        let recorder = recorder_at(5_000);
        let guaranteed = FixedSource::guaranteed("g", json!(1));
        let verifiable =
            FixedSource::guaranteed("v", json!(1)).with_class(DeterminismClass::Verifiable);
        let conditional =
            FixedSource::guaranteed("c", json!(1)).with_class(DeterminismClass::Conditional);

        recorder.set_level(RecordingLevel::Reduced);
        assert!(recorder.record(&guaranteed));
        assert!(recorder.record(&verifiable));
        assert!(!recorder.record(&conditional));

        recorder.set_level(RecordingLevel::Minimal);
        assert!(recorder.record(&guaranteed));
        assert!(!recorder.record(&verifiable));

        recorder.set_level(RecordingLevel::Paused);
        assert!(!recorder.record(&guaranteed));
    }

    #[test]
    fn capture_failure_is_counted_not_fatal() {
        let metrics = Arc::new(AgentMetrics::new());
        let recorder = AdaptiveRecorder::with_clock(
            Arc::new(RingBuffer::with_capacity(10_000)),
            metrics.clone(),
            fixed_clock(5_000),
        );
        let failing = FailingSource("broken".into());
        assert!(!recorder.record(&failing));
        assert_eq!(metrics.snapshot().capture_errors, 1);

        // A later healthy capture still succeeds.
        let healthy = FixedSource::guaranteed("ok", json!(1));
        assert!(recorder.record(&healthy));
        assert_eq!(metrics.snapshot().events_recorded, 1);
    }

    #[test]
    fn snapshot_values_are_redacted() {
        let recorder = recorder_at(5_000);
        let source = FixedSource::guaranteed(
            "login",
            json!({
                "username": "alice",
                "password": "hunter2",
                "token": "eyJhbGciOi.J1c2VyIjo.xyz",
            }),
        );
        recorder.record(&source);

        let events = recorder.buffer().get_all();
        let TimelineEvent::Snapshot(snapshot) = &events[0] else {
            panic!("expected snapshot");
        };
        let value: Value = serde_json::from_slice(&snapshot.value_bytes()).unwrap();
        assert_eq!(value["username"], "alice");
        assert_eq!(value["password"], "[REDACTED]");
        assert_eq!(value["token"], "[JWT_REDACTED]");
    }

    #[test]
    fn ignore_and_redact_tags_apply_before_serialization() {
        let recorder = recorder_at(5_000);
        let source = FixedSource::guaranteed("profile", json!({"bio": "hi", "internal": 1}))
            .with_tags(
                TagSet::empty()
                    .with(SourceTag::Ignore {
                        field: "internal".into(),
                    })
                    .with(SourceTag::Redact { field: "bio".into() }),
            );
        recorder.record(&source);

        let events = recorder.buffer().get_all();
        let TimelineEvent::Snapshot(snapshot) = &events[0] else {
            panic!("expected snapshot");
        };
        let value: Value = serde_json::from_slice(&snapshot.value_bytes()).unwrap();
        assert!(value.get("internal").is_none());
        assert_eq!(value["bio"], "[REDACTED]");
    }

    #[test]
    fn verifiable_snapshots_carry_checkpoint_hashes() {
        let verifier = Arc::new(RuntimeVerifier::new());
        let recorder = AdaptiveRecorder::with_clock(
            Arc::new(RingBuffer::with_capacity(10_000)),
            Arc::new(AgentMetrics::new()),
            fixed_clock(5_000),
        )
        .with_verifier(verifier.clone());

        let source = FixedSource::guaranteed("watched", json!({"n": 1}))
            .with_class(DeterminismClass::Verifiable);
        recorder.record(&source);

        let events = recorder.buffer().get_all();
        let TimelineEvent::Snapshot(snapshot) = &events[0] else {
            panic!("expected snapshot");
        };
        let hash = snapshot.checkpoint_hash().expect("checkpoint hash");
        assert_eq!(hash.len(), 32);
        assert_eq!(verifier.checkpoint_count(), 1);
    }
}
