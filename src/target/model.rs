//! Target model.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

use crate::engine::{Sample, SampleRing};

/// Stable identity of a target, unaffected by renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub u64);

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a probe loop is currently writing to the target's ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunState {
    Stopped,
    Running,
}

/// A monitored network endpoint and its sample history.
///
/// Shared as `Arc<Target>`: the ring stays alive for as long as any loop or
/// reader still holds the target, even after it has left the registry.
#[derive(Debug)]
pub struct Target {
    id: TargetId,
    name: String,
    addr: String,
    /// Position-derived legend/color slot; renumbered on removal.
    color_index: AtomicUsize,
    running: AtomicBool,
    ring: Arc<SampleRing>,
}

impl Target {
    pub(crate) fn new(
        id: TargetId,
        name: String,
        addr: String,
        color_index: usize,
        ring_capacity: usize,
    ) -> Self {
        Self {
            id,
            name,
            addr,
            color_index: AtomicUsize::new(color_index),
            running: AtomicBool::new(false),
            ring: Arc::new(SampleRing::new(ring_capacity)),
        }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hostname or IP address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn color_index(&self) -> usize {
        self.color_index.load(Ordering::Acquire)
    }

    pub(crate) fn set_color_index(&self, index: usize) {
        self.color_index.store(index, Ordering::Release);
    }

    pub fn run_state(&self) -> RunState {
        if self.running.load(Ordering::Acquire) {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }

    pub(crate) fn set_run_state(&self, state: RunState) {
        self.running
            .store(state == RunState::Running, Ordering::Release);
    }

    pub fn ring(&self) -> &Arc<SampleRing> {
        &self.ring
    }

    /// Oldest-first copy of the retained samples.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.ring.snapshot()
    }
}
