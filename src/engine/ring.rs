//! Fixed-capacity circular sample store.
//!
//! Every target owns one [`SampleRing`]. The probe loop is the only writer;
//! chart/report consumers read through [`SampleRing::snapshot`], which always
//! returns an owned, oldest-to-newest copy.
//!
//! Slots are versioned: [`SampleRing::push`] hands back a [`SlotRef`] carrying
//! the generation written into that slot, and [`SampleRing::update_at`] only
//! touches the slot while that generation is still current. An update aimed
//! at a slot that has since been overwritten by wraparound is ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// Default number of samples retained per target (~10 minutes at 1s).
pub const DEFAULT_RING_CAPACITY: usize = 600;

/// Latency value for samples without a valid round-trip.
/// Using -1.0 to distinguish from valid 0ms latency.
pub const NO_LATENCY_MS: f64 = -1.0;

/// Outcome classification of a single probe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SampleState {
    /// Reply arrived within MaxRTT.
    Ok,
    /// No reply within MaxRTT.
    Loss,
    /// Reply arrived after MaxRTT. Plotted as a disjoint marker.
    Late,
}

/// One timestamped measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Time the outcome was observed (UTC).
    pub ts: DateTime<Utc>,
    /// Round-trip time in milliseconds, or [`NO_LATENCY_MS`].
    pub latency_ms: f64,
    /// ICMP sequence number of the probe.
    pub seq: u16,
    /// Outcome classification.
    pub state: SampleState,
}

impl Sample {
    /// An on-time reply.
    pub fn ok(seq: u16, rtt: Duration) -> Self {
        Self {
            ts: Utc::now(),
            latency_ms: duration_ms(rtt),
            seq,
            state: SampleState::Ok,
        }
    }

    /// A provisional loss marker inserted when the deadline fires.
    pub fn loss(seq: u16) -> Self {
        Self {
            ts: Utc::now(),
            latency_ms: NO_LATENCY_MS,
            seq,
            state: SampleState::Loss,
        }
    }

    /// A reply that arrived after MaxRTT.
    pub fn late(seq: u16, rtt: Duration) -> Self {
        Self {
            ts: Utc::now(),
            latency_ms: duration_ms(rtt),
            seq,
            state: SampleState::Late,
        }
    }

    /// Whether `latency_ms` holds a measured round-trip.
    pub fn has_latency(&self) -> bool {
        self.latency_ms >= 0.0
    }
}

/// Convert a duration to fractional milliseconds (microsecond resolution).
pub fn duration_ms(d: Duration) -> f64 {
    d.as_micros() as f64 / 1000.0
}

/// Handle to a slot written by [`SampleRing::push`].
///
/// Only meaningful for the ring that issued it; other rings ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    ring: u64,
    index: usize,
    generation: u64,
}

impl SlotRef {
    /// Position in the backing storage.
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug)]
struct Slot {
    sample: Sample,
    generation: u64,
}

#[derive(Debug, Default)]
struct Inner {
    /// Grows up to `capacity`, then wraps.
    slots: Vec<Slot>,
    /// Write cursor.
    head: usize,
    next_generation: u64,
}

static NEXT_RING_ID: AtomicU64 = AtomicU64::new(0);

/// Fixed-capacity, overwrite-oldest sample store.
#[derive(Debug)]
pub struct SampleRing {
    id: u64,
    capacity: usize,
    inner: RwLock<Inner>,
}

impl SampleRing {
    /// Create a ring holding at most `capacity` samples.
    ///
    /// A zero-capacity ring is valid: every push is dropped.
    pub fn new(capacity: usize) -> Self {
        Self {
            id: NEXT_RING_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            inner: RwLock::new(Inner {
                slots: Vec::with_capacity(capacity),
                ..Inner::default()
            }),
        }
    }

    /// Maximum number of retained samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of currently retained samples.
    pub fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert at the write cursor, overwriting the oldest sample when full.
    ///
    /// Returns the slot used, or `None` for a zero-capacity ring.
    pub fn push(&self, sample: Sample) -> Option<SlotRef> {
        if self.capacity == 0 {
            return None;
        }

        let mut inner = self.inner.write();
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let index = inner.head;
        let slot = Slot { sample, generation };
        if inner.slots.len() < self.capacity {
            inner.slots.push(slot);
        } else {
            inner.slots[index] = slot;
        }
        inner.head = (index + 1) % self.capacity;

        Some(SlotRef {
            ring: self.id,
            index,
            generation,
        })
    }

    /// Apply `update` to the sample at `slot` if it has not been overwritten.
    ///
    /// Returns `false` (and does nothing) when the slot is stale or was
    /// issued by another ring. Callers must tolerate this.
    pub fn update_at(&self, slot: SlotRef, update: impl FnOnce(&mut Sample)) -> bool {
        if slot.ring != self.id {
            return false;
        }
        let mut inner = self.inner.write();
        match inner.slots.get_mut(slot.index) {
            Some(current) if current.generation == slot.generation => {
                update(&mut current.sample);
                true
            }
            _ => false,
        }
    }

    /// Copy of all retained samples, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        let mut out = Vec::new();
        self.snapshot_into(&mut out);
        out
    }

    /// Like [`snapshot`](Self::snapshot) but reuses `dst`'s allocation.
    pub fn snapshot_into(&self, dst: &mut Vec<Sample>) {
        dst.clear();
        let inner = self.inner.read();
        let n = inner.slots.len();
        // Until the first wrap the oldest sample sits at 0; afterwards at the cursor.
        let start = if n < self.capacity { 0 } else { inner.head };
        dst.extend((0..n).map(|i| inner.slots[(start + i) % n].sample));
    }

    /// Most recently written sample.
    pub fn latest(&self) -> Option<Sample> {
        let inner = self.inner.read();
        if inner.slots.is_empty() {
            return None;
        }
        let index = (inner.head + self.capacity - 1) % self.capacity;
        inner.slots.get(index).map(|slot| slot.sample)
    }
}

impl Default for SampleRing {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}
