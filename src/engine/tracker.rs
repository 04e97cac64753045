//! Pending-reply tracking and loss/late reconciliation.
//!
//! Each outstanding probe moves through an explicit state machine:
//!
//! ```text
//!            reply <= MaxRTT
//!   Sent ─────────────────────────────▶ OK (pushed)
//!     │
//!     │ deadline (MaxRTT)
//!     ▼
//!   Lost{slot} ── reply <= MaxRTT+GraceLate ──▶ LATE (slot converted in place)
//!     │
//!     ├── reply later than that ───────────────▶ LATE (separate marker pushed)
//!     └── reply window elapsed ────────────────▶ record dropped, LOSS stays
//!
//!   Sent ── transport gave up ──▶ Abandoned ── deadline ──▶ LOSS, record dropped
//! ```
//!
//! LOSS is only ever inserted by the deadline, so an early per-packet failure
//! still lands in the ring at MaxRTT, in order with its neighbours.
//!
//! The deadline task and the reply path both take the tracker lock before
//! inspecting a record, so exactly one of them decides each transition. The
//! ring lock is only ever taken while holding the tracker lock, never the
//! other way around.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::engine::ring::{Sample, SampleRing, SampleState, SlotRef, duration_ms};

/// Lifecycle phase of one outstanding probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    /// Echo sent, deadline armed.
    Sent,
    /// Deadline fired and a LOSS sample was inserted at `slot`
    /// (`None` when the ring has zero capacity).
    Lost { slot: Option<SlotRef> },
    /// Transport gave up before the deadline; no reply will be reported.
    Abandoned,
}

/// Which branch handled a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Recorded as OK.
    OnTime,
    /// Earlier LOSS slot converted to LATE in place.
    LateReconciled,
    /// Separate LATE marker pushed.
    LateDisjoint,
    /// Tracker closed; nothing recorded.
    Ignored,
}

#[derive(Debug)]
struct PendingProbe {
    deadline: Option<AbortHandle>,
    phase: ProbePhase,
}

impl PendingProbe {
    fn cancel_deadline(&self) {
        if let Some(handle) = &self.deadline {
            handle.abort();
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    pending: HashMap<u16, PendingProbe>,
    closed: bool,
}

/// Per-loop map from sequence number to outstanding probe.
///
/// Private to one probe loop. Writes outcomes into that loop's target ring.
#[derive(Debug)]
pub struct PendingTracker {
    label: String,
    ring: Arc<SampleRing>,
    max_rtt: Duration,
    grace_late: Duration,
    state: Mutex<TrackerState>,
}

impl PendingTracker {
    /// Create a tracker writing into `ring`.
    pub fn new(
        label: impl Into<String>,
        ring: Arc<SampleRing>,
        max_rtt: Duration,
        grace_late: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            ring,
            max_rtt,
            grace_late,
            state: Mutex::new(TrackerState::default()),
        })
    }

    pub fn max_rtt(&self) -> Duration {
        self.max_rtt
    }

    pub fn grace_late(&self) -> Duration {
        self.grace_late
    }

    /// Register probe `seq` and arm its MaxRTT deadline.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_send(self: &Arc<Self>, seq: u16) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        let deadline = tokio::time::Instant::now() + self.max_rtt;
        let tracker: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(tracker) = tracker.upgrade() {
                tracker.expire(seq);
            }
        });

        let record = PendingProbe {
            deadline: Some(task.abort_handle()),
            phase: ProbePhase::Sent,
        };
        // Sequence numbers wrap; a leftover record for a reused seq is stale.
        if let Some(stale) = state.pending.insert(seq, record) {
            stale.cancel_deadline();
        }
    }

    /// Deadline path: insert a provisional LOSS unless the reply won the race.
    fn expire(&self, seq: u16) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let Some(record) = state.pending.get_mut(&seq) else {
            // Reply already handled
            return;
        };
        let phase = record.phase;
        match phase {
            ProbePhase::Lost { .. } => return,
            ProbePhase::Sent => {
                let slot = self.ring.push(Sample::loss(seq));
                record.phase = ProbePhase::Lost { slot };
                record.deadline = None;
            }
            ProbePhase::Abandoned => {
                state.pending.remove(&seq);
                self.ring.push(Sample::loss(seq));
            }
        }
        tracing::debug!(target_name = %self.label, seq, "Probe deadline elapsed, loss recorded");
    }

    /// Reply path: classify `rtt` and record the outcome.
    pub fn on_reply(&self, seq: u16, rtt: Duration) -> ReplyOutcome {
        let mut state = self.state.lock();
        if state.closed {
            return ReplyOutcome::Ignored;
        }

        let phase = state.pending.remove(&seq).map(|record| {
            record.cancel_deadline();
            record.phase
        });
        let loss_slot = match phase {
            Some(ProbePhase::Lost { slot }) => slot,
            _ => None,
        };
        let latency_ms = duration_ms(rtt);

        let outcome = if rtt <= self.max_rtt {
            // Timer skew can let the deadline win even though the measured
            // rtt is on time; reuse that slot instead of adding a second point.
            let converted = loss_slot.is_some_and(|slot| {
                self.ring.update_at(slot, |s| {
                    s.state = SampleState::Ok;
                    s.latency_ms = latency_ms;
                    s.ts = chrono::Utc::now();
                })
            });
            if !converted {
                self.ring.push(Sample::ok(seq, rtt));
            }
            ReplyOutcome::OnTime
        } else if rtt <= self.max_rtt + self.grace_late
            && loss_slot.is_some_and(|slot| {
                self.ring.update_at(slot, |s| {
                    s.state = SampleState::Late;
                    s.latency_ms = latency_ms;
                    s.ts = chrono::Utc::now();
                })
            })
        {
            ReplyOutcome::LateReconciled
        } else {
            self.ring.push(Sample::late(seq, rtt));
            ReplyOutcome::LateDisjoint
        };

        tracing::debug!(
            target_name = %self.label,
            seq,
            rtt_ms = latency_ms,
            outcome = ?outcome,
            "Probe reply recorded"
        );
        outcome
    }

    /// The transport gave up waiting for `seq`.
    ///
    /// After the deadline the record is dropped and its LOSS stays in the
    /// ring. Before the deadline the record is only marked
    /// [`ProbePhase::Abandoned`]; the deadline still inserts the LOSS.
    pub fn abandon(&self, seq: u16) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let Some(record) = state.pending.get_mut(&seq) else {
            return;
        };
        let phase = record.phase;
        match phase {
            ProbePhase::Sent => record.phase = ProbePhase::Abandoned,
            ProbePhase::Abandoned => {}
            ProbePhase::Lost { .. } => {
                state.pending.remove(&seq);
            }
        }
    }

    /// Abort every deadline and discard all records.
    ///
    /// After this call no further samples are written by this tracker.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for (_, record) in state.pending.drain() {
            record.cancel_deadline();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of outstanding records.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Current phase of `seq`, if still tracked.
    pub fn phase(&self, seq: u16) -> Option<ProbePhase> {
        self.state.lock().pending.get(&seq).map(|record| record.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    const MAX_RTT: Duration = Duration::from_millis(300);
    const GRACE: Duration = Duration::from_millis(100);

    fn setup(capacity: usize) -> (Arc<SampleRing>, Arc<PendingTracker>) {
        let ring = Arc::new(SampleRing::new(capacity));
        let tracker = PendingTracker::new("test", Arc::clone(&ring), MAX_RTT, GRACE);
        (ring, tracker)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_time_reply_single_ok() {
        let (ring, tracker) = setup(16);
        tracker.on_send(1);
        sleep(ms(50)).await;

        assert_eq!(tracker.on_reply(1, ms(50)), ReplyOutcome::OnTime);
        sleep(ms(1000)).await;

        let snap = ring.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].state, SampleState::Ok);
        assert_eq!(snap[0].latency_ms, 50.0);
        assert_eq!(snap[0].seq, 1);
        assert_eq!(tracker.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reply_single_loss() {
        let (ring, tracker) = setup(16);
        tracker.on_send(7);

        sleep(ms(299)).await;
        assert!(ring.is_empty());
        assert_eq!(tracker.phase(7), Some(ProbePhase::Sent));

        sleep(ms(2)).await;
        let snap = ring.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].state, SampleState::Loss);
        assert_eq!(snap[0].latency_ms, crate::engine::ring::NO_LATENCY_MS);
        assert!(matches!(tracker.phase(7), Some(ProbePhase::Lost { slot: Some(_) })));

        // Nothing else happens for this sequence
        sleep(ms(10_000)).await;
        assert_eq!(ring.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_within_grace_converts_loss() {
        let (ring, tracker) = setup(16);
        tracker.on_send(3);
        sleep(ms(350)).await;
        assert_eq!(ring.snapshot()[0].state, SampleState::Loss);

        assert_eq!(tracker.on_reply(3, ms(350)), ReplyOutcome::LateReconciled);

        let snap = ring.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].state, SampleState::Late);
        assert_eq!(snap[0].latency_ms, 350.0);
        assert_eq!(snap[0].seq, 3);
        assert_eq!(tracker.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_boundary_is_inclusive() {
        let (ring, tracker) = setup(16);
        tracker.on_send(3);
        sleep(ms(400)).await;

        assert_eq!(tracker.on_reply(3, ms(400)), ReplyOutcome::LateReconciled);
        assert_eq!(ring.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_beyond_grace_pushes_separate_marker() {
        let (ring, tracker) = setup(16);
        tracker.on_send(4);
        sleep(ms(650)).await;

        assert_eq!(tracker.on_reply(4, ms(650)), ReplyOutcome::LateDisjoint);

        let snap = ring.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!((snap[0].seq, snap[0].state), (4, SampleState::Loss));
        assert_eq!((snap[1].seq, snap[1].state), (4, SampleState::Late));
        assert_eq!(snap[1].latency_ms, 650.0);
        assert_eq!(tracker.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_after_slot_evicted_pushes_marker() {
        let (ring, tracker) = setup(1);
        tracker.on_send(5);
        sleep(ms(320)).await;
        // Another writer overwrote the only slot
        ring.push(Sample::ok(99, ms(1)));

        assert_eq!(tracker.on_reply(5, ms(350)), ReplyOutcome::LateDisjoint);

        let snap = ring.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!((snap[0].seq, snap[0].state), (5, SampleState::Late));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_without_record() {
        let (ring, tracker) = setup(16);
        assert_eq!(tracker.on_reply(42, ms(500)), ReplyOutcome::LateDisjoint);
        assert_eq!(tracker.on_reply(43, ms(20)), ReplyOutcome::OnTime);

        let states: Vec<_> = ring.snapshot().iter().map(|s| s.state).collect();
        assert_eq!(states, vec![SampleState::Late, SampleState::Ok]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_time_rtt_after_deadline_reuses_slot() {
        let (ring, tracker) = setup(16);
        tracker.on_send(8);
        sleep(ms(305)).await;
        assert_eq!(ring.len(), 1);

        // Measured rtt is on time even though the deadline task ran first
        assert_eq!(tracker.on_reply(8, ms(299)), ReplyOutcome::OnTime);

        let snap = ring.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].state, SampleState::Ok);
        assert_eq!(snap[0].latency_ms, 299.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_probes_keep_arrival_order() {
        let (ring, tracker) = setup(16);
        tracker.on_send(1);
        sleep(ms(100)).await;
        tracker.on_send(2);
        sleep(ms(20)).await;
        tracker.on_reply(2, ms(20));
        // seq 1 times out at t=300
        sleep(ms(500)).await;

        let got: Vec<_> = ring.snapshot().iter().map(|s| (s.seq, s.state)).collect();
        assert_eq!(got, vec![(2, SampleState::Ok), (1, SampleState::Loss)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_drops_record_keeps_loss() {
        let (ring, tracker) = setup(16);
        tracker.on_send(9);
        sleep(ms(301)).await;

        tracker.abandon(9);

        assert_eq!(tracker.pending_len(), 0);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.snapshot()[0].state, SampleState::Loss);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_before_deadline_waits_for_max_rtt() {
        let (ring, tracker) = setup(16);
        tracker.on_send(9);
        sleep(ms(10)).await;

        tracker.abandon(9);
        assert_eq!(tracker.phase(9), Some(ProbePhase::Abandoned));
        assert!(ring.is_empty());

        sleep(ms(289)).await;
        assert!(ring.is_empty());

        sleep(ms(2)).await;
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.snapshot()[0].state, SampleState::Loss);
        assert_eq!(tracker.pending_len(), 0);

        sleep(ms(1000)).await;
        assert_eq!(ring.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_keeps_ring_order() {
        let (ring, tracker) = setup(16);
        tracker.on_send(1);
        sleep(ms(5)).await;
        tracker.abandon(1);
        sleep(ms(95)).await;
        tracker.on_send(2);
        sleep(ms(20)).await;
        tracker.on_reply(2, ms(20));
        sleep(ms(500)).await;

        let got: Vec<_> = ring.snapshot().iter().map(|s| (s.seq, s.state)).collect();
        assert_eq!(got, vec![(2, SampleState::Ok), (1, SampleState::Loss)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_discards_abandoned_probe() {
        let (ring, tracker) = setup(16);
        tracker.on_send(1);
        tracker.abandon(1);
        tracker.close();
        sleep(ms(1000)).await;
        assert!(ring.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_deadlines() {
        let (ring, tracker) = setup(16);
        tracker.on_send(1);
        tracker.on_send(2);
        assert_eq!(tracker.pending_len(), 2);

        tracker.close();
        sleep(ms(1000)).await;

        assert!(ring.is_empty());
        assert_eq!(tracker.pending_len(), 0);
        assert!(tracker.is_closed());

        // Post-shutdown sends and replies write nothing
        tracker.on_send(3);
        assert_eq!(tracker.on_reply(1, ms(10)), ReplyOutcome::Ignored);
        sleep(ms(1000)).await;
        assert!(ring.is_empty());
        assert_eq!(tracker.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reused_sequence_replaces_stale_record() {
        let (ring, tracker) = setup(16);
        tracker.on_send(1);
        sleep(ms(100)).await;
        tracker.on_send(1);
        sleep(ms(250)).await;

        // First deadline (t=300) was aborted; second fires at t=400
        assert!(ring.is_empty());
        sleep(ms(60)).await;
        assert_eq!(ring.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_deadline_and_reply_race_yields_one_outcome() {
        let max_rtt = ms(2);
        let grace = ms(2);
        let ring = Arc::new(SampleRing::new(4096));
        let tracker = PendingTracker::new("race", Arc::clone(&ring), max_rtt, grace);

        // On time, within grace, beyond grace
        let rtts = [ms(1), ms(3), ms(10)];
        let mut replies = tokio::task::JoinSet::new();
        for seq in 0..900u16 {
            tracker.on_send(seq);
            let tracker = Arc::clone(&tracker);
            let rtt = rtts[seq as usize % rtts.len()];
            // Lands on the same timer tick as the deadline
            replies.spawn(async move {
                sleep(max_rtt).await;
                tracker.on_reply(seq, rtt);
            });
        }
        while let Some(res) = replies.join_next().await {
            res.unwrap();
        }
        sleep(ms(50)).await;

        assert_eq!(tracker.pending_len(), 0);

        let mut by_seq: HashMap<u16, Vec<SampleState>> = HashMap::new();
        for sample in ring.snapshot() {
            by_seq.entry(sample.seq).or_default().push(sample.state);
        }
        assert_eq!(by_seq.len(), 900);

        for (seq, states) in by_seq {
            match seq % 3 {
                0 => assert_eq!(states, vec![SampleState::Ok], "seq {seq}"),
                1 => assert_eq!(states, vec![SampleState::Late], "seq {seq}"),
                _ => assert!(
                    states == vec![SampleState::Late]
                        || states == vec![SampleState::Loss, SampleState::Late],
                    "seq {seq}: {states:?}"
                ),
            }
        }
    }
}
