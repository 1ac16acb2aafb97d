use std::collections::VecDeque;

use parking_lot::RwLock;

use crate::timeline::event::{current_thread_name, now_ms, GapEvent, TimelineEvent};

pub const MIN_CAPACITY: usize = 100;
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Bounded, thread-safe event store with FIFO overwrite.
///
/// Evicting an event leaves a trace: each eviction synthesizes one overflow
/// gap marker that readers see ahead of the retained window, so a consumer
/// can tell recorded history apart from discarded history. Gap markers are
/// themselves bounded; past `capacity` markers the oldest folds its missed
/// count into its successor.
///
/// Readers take point-in-time copies under a read lock; the single writer
/// path takes the write lock, so readers always observe a coherent window.
pub struct RingBuffer {
    capacity: usize,
    inner: RwLock<Inner>,
}

struct Inner {
    /// Retained events, oldest first.
    events: VecDeque<TimelineEvent>,
    /// Overflow markers preceding the retained window, oldest first.
    overflow_gaps: VecDeque<GapEvent>,
    overflow_count: u64,
    total_appended: u64,
}

impl RingBuffer {
    /// Creates a buffer with the given capacity, clamped to `MIN_CAPACITY`.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            capacity,
            inner: RwLock::new(Inner {
                events: VecDeque::with_capacity(capacity),
                overflow_gaps: VecDeque::new(),
                overflow_count: 0,
                total_appended: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends an event, evicting the oldest when full. Returns whether an
    /// old event was overwritten.
    pub fn append(&self, event: TimelineEvent) -> bool {
        let mut inner = self.inner.write();
        inner.total_appended += 1;

        let evicted = if inner.events.len() == self.capacity {
            inner.events.pop_front();
            inner.overflow_count += 1;
            let gap = GapEvent::overflow(now_ms(), current_thread_name());
            inner.overflow_gaps.push_back(gap);
            if inner.overflow_gaps.len() > self.capacity {
                // Fold the oldest marker into its successor to stay bounded.
                if let Some(oldest) = inner.overflow_gaps.pop_front() {
                    if let Some(next) = inner.overflow_gaps.front_mut() {
                        let folded = oldest.missed_count.unwrap_or(1);
                        next.missed_count = Some(next.missed_count.unwrap_or(1) + folded);
                    }
                }
            }
            true
        } else {
            false
        };

        inner.events.push_back(event);
        evicted
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }

    /// Total events discarded to make room.
    pub fn overflow_count(&self) -> u64 {
        self.inner.read().overflow_count
    }

    pub fn total_appended(&self) -> u64 {
        self.inner.read().total_appended
    }

    /// Overflow gap markers followed by retained events, oldest first.
    pub fn get_all(&self) -> Vec<TimelineEvent> {
        let inner = self.inner.read();
        inner
            .overflow_gaps
            .iter()
            .cloned()
            .map(TimelineEvent::Gap)
            .chain(inner.events.iter().cloned())
            .collect()
    }

    /// Retained events whose sequence number falls in `[from_seq, to_seq]`,
    /// in chronological order. Linear scan; events cycle through memory
    /// unordered by sequence.
    pub fn get_range(&self, from_seq: u64, to_seq: u64) -> Vec<TimelineEvent> {
        let inner = self.inner.read();
        inner
            .events
            .iter()
            .filter(|ev| {
                let seq = ev.sequence_no();
                seq >= from_seq && seq <= to_seq
            })
            .cloned()
            .collect()
    }

    /// The most recent `n` retained events, in chronological order.
    pub fn get_recent(&self, n: usize) -> Vec<TimelineEvent> {
        let inner = self.inner.read();
        let skip = inner.events.len().saturating_sub(n);
        inner.events.iter().skip(skip).cloned().collect()
    }

    /// All retained snapshots for one source, in chronological order.
    pub fn get_by_source(&self, source_id: &str) -> Vec<TimelineEvent> {
        let inner = self.inner.read();
        inner
            .events
            .iter()
            .filter(|ev| matches!(ev, TimelineEvent::Snapshot(s) if s.source_id == source_id))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.events.clear();
        inner.overflow_gaps.clear();
        inner.overflow_count = 0;
        inner.total_appended = 0;
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}
