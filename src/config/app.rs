//! Application configuration structures.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{DEFAULT_RING_CAPACITY, ProbeSettings};

use super::validation::ConfigError;

// =============================================================================
// Constants
// =============================================================================

/// Default interval between summary log lines (10 seconds).
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest probe interval accepted.
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(10);

/// Largest ICMP payload accepted.
pub const MAX_PAYLOAD_SIZE: usize = 65_500;

fn default_enabled() -> bool {
    true
}

fn default_ring_capacity() -> usize {
    DEFAULT_RING_CAPACITY
}

fn default_report_interval() -> Duration {
    DEFAULT_REPORT_INTERVAL
}

// =============================================================================
// Ping Configuration
// =============================================================================

/// Probe timing plus per-target retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingConfig {
    /// Interval, MaxRTT, GraceLate, reply window, payload size.
    #[serde(flatten)]
    pub probe: ProbeSettings,

    /// Samples retained per target (default: 600).
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            probe: ProbeSettings::default(),
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

// =============================================================================
// Target Configuration
// =============================================================================

/// One monitored endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Display name.
    pub name: String,

    /// Hostname or IP address.
    pub addr: String,

    /// Probe this target (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            enabled: true,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Probe settings.
    #[serde(default)]
    pub ping: PingConfig,

    /// Interval between per-target summary log lines (default: 10s).
    #[serde(default = "default_report_interval", with = "humantime_serde")]
    pub report_interval: Duration,

    /// Monitored targets, in legend order.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ping: PingConfig::default(),
            report_interval: DEFAULT_REPORT_INTERVAL,
            targets: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let probe = &self.ping.probe;

        if probe.interval < MIN_PROBE_INTERVAL {
            return Err(ConfigError::ValidationError(format!(
                "ping interval must be at least {}",
                humantime::format_duration(MIN_PROBE_INTERVAL)
            )));
        }

        if probe.max_rtt.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ValidationError(
                "ping max_rtt must be non-zero when set".to_string(),
            ));
        }

        if probe.grace_late.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ValidationError(
                "ping grace_late must be non-zero when set".to_string(),
            ));
        }

        if probe.payload_size > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "ping payload_size must be at most {MAX_PAYLOAD_SIZE}"
            )));
        }

        if self.ping.ring_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "ping ring_capacity must be positive".to_string(),
            ));
        }

        if self.report_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "report_interval must be non-zero".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "target name must not be empty".to_string(),
                ));
            }
            if target.addr.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "target '{}': addr must not be empty",
                    target.name
                )));
            }
            if !names.insert(target.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate target name: '{}'",
                    target.name
                )));
            }
        }

        Ok(())
    }

    /// Targets with `enabled: true`.
    pub fn enabled_targets(&self) -> impl Iterator<Item = &TargetConfig> {
        self.targets.iter().filter(|t| t.enabled)
    }
}
