//! Probe Engine
//!
//! Sends periodic echo requests to each target, reconciles replies against
//! their deadlines, and records OK / LOSS / LATE samples into the target's
//! ring for live readers.
//!
//! # Architecture
//!
//! - [`SampleRing`]: bounded, versioned circular sample store
//! - [`PendingTracker`]: per-loop outstanding-probe state machine
//! - [`EchoTransport`]: echo request/reply seam ([`IcmpTransport`] in production)
//! - [`ProbeLoop`] / [`LoopHandle`]: one cancellable task per target
//! - [`WindowStats`]: summary of a snapshot
//!
//! # Example
//!
//! ```rust,no_run
//! use pingline::engine::{ProbeSettings, start_loop};
//! use pingline::target::TargetRegistry;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), pingline::engine::ProbeError> {
//! let registry = TargetRegistry::new();
//! let target = registry.add_target("cloudflare", "1.1.1.1", 600);
//! let handle = start_loop(target.clone(), &ProbeSettings::new(Duration::from_secs(1))).await?;
//!
//! tokio::time::sleep(Duration::from_secs(5)).await;
//! println!("{:?}", target.snapshot());
//!
//! handle.stop();
//! # Ok(())
//! # }
//! ```

mod error;
mod probe;
pub mod ring;
mod stats;
mod tracker;
mod transport;

pub use error::{EchoError, ProbeError};
pub use probe::{
    DEFAULT_GRACE_LATE, DEFAULT_INTERVAL, DEFAULT_PAYLOAD_SIZE, DEFAULT_REPLY_WINDOW, LoopHandle,
    ProbeLoop, ProbeSettings, spawn_loop, start_loop,
};
pub use ring::{DEFAULT_RING_CAPACITY, NO_LATENCY_MS, Sample, SampleRing, SampleState, SlotRef};
pub use stats::WindowStats;
pub use tracker::{PendingTracker, ProbePhase, ReplyOutcome};
pub use transport::{EchoTransport, IcmpFactory, IcmpTransport, TransportFactory, resolve_host};
