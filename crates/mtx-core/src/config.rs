// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retry policy and session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error codes that are retried by default when an error carries no
/// explicit retryable bit.
pub const DEFAULT_RETRYABLE_ERRORS: &[&str] = &[
    "CONNECTION_ERROR",
    "TIMEOUT",
    "NETWORK_ERROR",
    "TEMPORARY_FAILURE",
];

/// A configuration value violated its permitted range.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {field}: {value} (expected {expected})")]
pub struct ConfigError {
    /// Name of the offending field.
    pub field: &'static str,
    /// The rejected value, rendered as text.
    pub value: String,
    /// Human-readable description of the permitted range.
    pub expected: &'static str,
}

impl ConfigError {
    fn new(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

// ── Retry policy ────────────────────────────────────────────────────

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first attempt.
    pub max_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on the computed backoff, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Whether to add ±20% uniform jitter to computed delays.
    pub jitter: bool,
    /// Uppercase tokens that mark an error message as retryable.
    pub retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
            retryable_errors: DEFAULT_RETRYABLE_ERRORS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Check every field against its permitted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.max_attempts) {
            return Err(ConfigError::new(
                "max_attempts",
                self.max_attempts,
                "1..=10",
            ));
        }
        if self.base_delay_ms < 100 {
            return Err(ConfigError::new(
                "base_delay_ms",
                self.base_delay_ms,
                ">= 100",
            ));
        }
        if self.max_delay_ms < 1000 {
            return Err(ConfigError::new(
                "max_delay_ms",
                self.max_delay_ms,
                ">= 1000",
            ));
        }
        if !(1.0..=10.0).contains(&self.backoff_multiplier) {
            return Err(ConfigError::new(
                "backoff_multiplier",
                self.backoff_multiplier,
                "1.0..=10.0",
            ));
        }
        Ok(())
    }
}

// ── Session configuration ───────────────────────────────────────────

/// Configuration for a reliability session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Master switch for the reliability features.
    pub enabled: bool,
    /// Default retry policy; per-call overrides win.
    pub retry_policy: RetryPolicy,
    /// Default per-attempt timeout in milliseconds; per-call overrides win.
    pub default_timeout_ms: u64,
    /// Upper bound on simultaneous in-flight calls.
    pub max_concurrent_requests: usize,
    /// Sliding window within which a cached result is still visible, in
    /// milliseconds.
    pub deduplication_window_ms: u64,
    /// Grace period granted to in-flight work during shutdown.
    #[serde(with = "duration_millis")]
    pub shutdown_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_policy: RetryPolicy::default(),
            default_timeout_ms: 30_000,
            max_concurrent_requests: 10,
            deduplication_window_ms: 300_000,
            shutdown_grace: Duration::from_millis(100),
        }
    }
}

impl SessionConfig {
    /// Check every field (including the nested retry policy) against its
    /// permitted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry_policy.validate()?;
        if !(1000..=600_000).contains(&self.default_timeout_ms) {
            return Err(ConfigError::new(
                "default_timeout_ms",
                self.default_timeout_ms,
                "1000..=600000",
            ));
        }
        if !(1..=100).contains(&self.max_concurrent_requests) {
            return Err(ConfigError::new(
                "max_concurrent_requests",
                self.max_concurrent_requests,
                "1..=100",
            ));
        }
        if !(10_000..=3_600_000).contains(&self.deduplication_window_ms) {
            return Err(ConfigError::new(
                "deduplication_window_ms",
                self.deduplication_window_ms,
                "10000..=3600000",
            ));
        }
        if self.shutdown_grace.is_zero() {
            return Err(ConfigError::new("shutdown_grace", 0, "> 0 ms"));
        }
        Ok(())
    }

    /// The deduplication window as a [`Duration`].
    #[must_use]
    pub fn deduplication_window(&self) -> Duration {
        Duration::from_millis(self.deduplication_window_ms)
    }
}

/// Serde helper — `Duration` as integer milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        (val.as_millis() as u64).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let ms: u64 = u64::deserialize(de)?;
        Ok(Duration::from_millis(ms))
    }
}
