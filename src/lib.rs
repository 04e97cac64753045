//! Pingline - Real-time Multi-target Probe Engine
//!
//! This crate provides the core of a live network-latency monitor: it sends
//! periodic ICMP echo requests to any number of targets concurrently,
//! classifies every probe as on-time, lost, or late, and keeps a bounded
//! history per target for live charts. It can be used as a library, or run
//! as a standalone binary with the `pingline` executable.
//!
//! # Architecture
//!
//! - **Engine**: sample rings, pending-reply reconciliation, probe loops
//! - **Targets**: registry of monitored endpoints, each owning its ring
//! - **Monitor**: global start/stop, restart on settings change, add/remove
//! - **Config**: YAML configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use pingline::{Monitor, ProbeSettings, TargetRegistry};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() {
//! let registry = Arc::new(TargetRegistry::new());
//! let monitor = Monitor::new(registry.clone(), ProbeSettings::new(Duration::from_secs(1)));
//!
//! monitor.add_target("cloudflare", "1.1.1.1", 600).await.ok();
//! monitor.start_all().await;
//!
//! for target in registry.list_targets() {
//!     let samples = target.snapshot();
//!     println!("{}: {} samples", target.name(), samples.len());
//! }
//!
//! monitor.shutdown().await;
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod monitor;
pub mod target;

pub use config::{AppConfig, ConfigError};
pub use engine::{
    LoopHandle, ProbeError, ProbeSettings, Sample, SampleRing, SampleState, WindowStats,
    start_loop,
};
pub use monitor::Monitor;
pub use target::{RunState, Target, TargetId, TargetRegistry};
