//! Configuration module for Pingline.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Probe timing (interval, MaxRTT, GraceLate, reply window)
//! - Per-target retention (ring capacity)
//! - Target list

mod app;
mod validation;

pub use app::{AppConfig, PingConfig, TargetConfig};
pub use validation::{ConfigError, parse_duration, parse_target_spec};

// Re-export constants
pub use app::{DEFAULT_REPORT_INTERVAL, MAX_PAYLOAD_SIZE, MIN_PROBE_INTERVAL};
