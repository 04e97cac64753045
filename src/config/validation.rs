//! Configuration validation utilities.

use std::time::Duration;

use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse duration string using humantime.
///
/// Supports various formats: `500ms`, `1s`, `1m30s`, `2h`, etc.
///
/// # Examples
///
/// ```
/// use pingline::config::parse_duration;
///
/// assert_eq!(parse_duration("1s").unwrap().as_millis(), 1000);
/// assert_eq!(parse_duration("250ms").unwrap().as_millis(), 250);
/// assert_eq!(parse_duration("1m").unwrap().as_secs(), 60);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Parse a `NAME=ADDR` pair. A bare `ADDR` uses the address as its name.
pub fn parse_target_spec(s: &str) -> Result<(String, String), String> {
    let (name, addr) = match s.split_once('=') {
        Some((name, addr)) => (name.trim(), addr.trim()),
        None => (s.trim(), s.trim()),
    };
    if name.is_empty() || addr.is_empty() {
        return Err(format!("invalid target '{s}', expected NAME=ADDR"));
    }
    Ok((name.to_string(), addr.to_string()))
}
