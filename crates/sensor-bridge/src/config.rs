// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration
//!
//! Supports both programmatic (builder) and file-based (TOML) configuration.
//! Every field has a default, so an empty file is a valid configuration.

use crate::key::{KeyStrategy, KeyStrategyKind};
use crate::persister::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Maximum time a partial record may stay open (ms)
    pub staleness_window_ms: u64,

    /// Total insert attempts per record, including the first
    pub retry_attempts: u32,

    /// Backoff before the first retry (ms); doubles per retry
    pub retry_backoff_base_ms: u64,

    /// Backoff cap (ms)
    pub retry_backoff_max_ms: u64,

    /// Bound on a single insert attempt (ms)
    pub attempt_timeout_ms: u64,

    /// Bound on the whole persist call, retries included (ms)
    pub commit_deadline_ms: u64,

    /// Window inside which an identical record fingerprint is a duplicate (ms)
    pub dedup_window_ms: u64,

    /// Interval between staleness sweeps (ms)
    pub sweep_interval_ms: u64,

    /// How fields are grouped into records
    pub key_strategy: KeyStrategyKind,

    /// Bucket width for the `time_bucket` strategy (ms)
    pub bucket_width_ms: u64,

    /// Inbound message queue capacity
    pub channel_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            staleness_window_ms: 30_000,
            retry_attempts: 5,
            retry_backoff_base_ms: 100,
            retry_backoff_max_ms: 5_000,
            attempt_timeout_ms: 2_000,
            commit_deadline_ms: 15_000,
            dedup_window_ms: 60_000,
            sweep_interval_ms: 1_000,
            key_strategy: KeyStrategyKind::Global,
            bucket_width_ms: 10_000,
            channel_capacity: 1024,
        }
    }
}

impl BridgeConfig {
    /// Create a new config builder
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML (used by `gen-config`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.staleness_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "staleness_window_ms must be greater than zero".into(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry_attempts must be at least 1".into(),
            ));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "attempt_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.commit_deadline_ms < self.attempt_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "commit_deadline_ms ({}) is shorter than attempt_timeout_ms ({})",
                self.commit_deadline_ms, self.attempt_timeout_ms
            )));
        }
        if self.retry_backoff_max_ms < self.retry_backoff_base_ms {
            return Err(ConfigError::Invalid(format!(
                "retry_backoff_max_ms ({}) is below retry_backoff_base_ms ({})",
                self.retry_backoff_max_ms, self.retry_backoff_base_ms
            )));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_ms must be greater than zero".into(),
            ));
        }
        if self.key_strategy == KeyStrategyKind::TimeBucket && self.bucket_width_ms == 0 {
            return Err(ConfigError::Invalid(
                "bucket_width_ms must be greater than zero for time_bucket".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_millis(self.staleness_window_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    /// Never zero, even on an unvalidated config.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            backoff_base: Duration::from_millis(self.retry_backoff_base_ms),
            backoff_max: Duration::from_millis(self.retry_backoff_max_ms),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            deadline: Duration::from_millis(self.commit_deadline_ms),
        }
    }

    pub fn key_strategy(&self) -> Box<dyn KeyStrategy> {
        self.key_strategy
            .build(Duration::from_millis(self.bucket_width_ms))
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    staleness_window: Option<Duration>,
    retry_attempts: Option<u32>,
    retry_backoff_base: Option<Duration>,
    retry_backoff_max: Option<Duration>,
    attempt_timeout: Option<Duration>,
    commit_deadline: Option<Duration>,
    dedup_window: Option<Duration>,
    sweep_interval: Option<Duration>,
    key_strategy: Option<KeyStrategyKind>,
    bucket_width: Option<Duration>,
    channel_capacity: Option<usize>,
}

/// Whole milliseconds; a non-zero duration below 1 ms rounds up to 1 ms.
fn millis(d: Duration) -> u64 {
    let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 && !d.is_zero() {
        1
    } else {
        ms
    }
}

impl BridgeConfigBuilder {
    pub fn staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = Some(window);
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn retry_backoff_base(mut self, base: Duration) -> Self {
        self.retry_backoff_base = Some(base);
        self
    }

    pub fn retry_backoff_max(mut self, max: Duration) -> Self {
        self.retry_backoff_max = Some(max);
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn commit_deadline(mut self, deadline: Duration) -> Self {
        self.commit_deadline = Some(deadline);
        self
    }

    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = Some(window);
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub fn key_strategy(mut self, kind: KeyStrategyKind) -> Self {
        self.key_strategy = Some(kind);
        self
    }

    pub fn bucket_width(mut self, width: Duration) -> Self {
        self.bucket_width = Some(width);
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    /// Build the configuration
    pub fn build(self) -> BridgeConfig {
        let defaults = BridgeConfig::default();

        BridgeConfig {
            staleness_window_ms: self
                .staleness_window
                .map(millis)
                .unwrap_or(defaults.staleness_window_ms),
            retry_attempts: self.retry_attempts.unwrap_or(defaults.retry_attempts),
            retry_backoff_base_ms: self
                .retry_backoff_base
                .map(millis)
                .unwrap_or(defaults.retry_backoff_base_ms),
            retry_backoff_max_ms: self
                .retry_backoff_max
                .map(millis)
                .unwrap_or(defaults.retry_backoff_max_ms),
            attempt_timeout_ms: self
                .attempt_timeout
                .map(millis)
                .unwrap_or(defaults.attempt_timeout_ms),
            commit_deadline_ms: self
                .commit_deadline
                .map(millis)
                .unwrap_or(defaults.commit_deadline_ms),
            dedup_window_ms: self
                .dedup_window
                .map(millis)
                .unwrap_or(defaults.dedup_window_ms),
            sweep_interval_ms: self
                .sweep_interval
                .map(millis)
                .unwrap_or(defaults.sweep_interval_ms),
            key_strategy: self.key_strategy.unwrap_or(defaults.key_strategy),
            bucket_width_ms: self
                .bucket_width
                .map(millis)
                .unwrap_or(defaults.bucket_width_ms),
            channel_capacity: self.channel_capacity.unwrap_or(defaults.channel_capacity),
        }
    }
}
