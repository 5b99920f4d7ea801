// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Policy configuration.
//!
//! Every knob has a default, so an empty YAML document is a valid config.
//! Durations are plain milliseconds.

use backon::{ConstantBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML configuration: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Retry budget for one remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first; 1 disables retries.
    pub max_attempts: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f32,
    pub jitter: bool,
    /// Upper bound on a single request/response exchange.
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay_ms: 100,
            max_delay_ms: 5_000,
            factor: 2.0,
            jitter: true,
            attempt_timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delays between attempts; yields `max_attempts - 1` values.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_factor(self.factor)
            .with_max_times(self.max_attempts.saturating_sub(1));
        if self.jitter { builder.with_jitter() } else { builder }
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Observation window after a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyPolicy {
    /// Poll after delete until the path reads as absent.
    pub verify_deletes: bool,
    pub max_polls: usize,
    pub poll_delay_ms: u64,
}

impl Default for ConsistencyPolicy {
    fn default() -> Self {
        Self {
            verify_deletes: true,
            max_polls: 10,
            poll_delay_ms: 50,
        }
    }
}

impl ConsistencyPolicy {
    /// Pauses between polls; yields `max_polls - 1` values.
    #[must_use]
    pub fn polling(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(Duration::from_millis(self.poll_delay_ms))
            .with_max_times(self.max_polls.saturating_sub(1))
    }
}

/// What `delete` of a missing path reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMissing {
    /// Idempotent: nothing to delete is success.
    #[default]
    Succeed,
    /// Strict: a missing path is `NotFound`.
    NotFound,
}

/// What `rename` does when the destination exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenameOverwrite {
    /// Refuse with `AlreadyExists`.
    #[default]
    Fail,
    /// Replace an existing file with a file in the same remote call.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub retry: RetryPolicy,
    pub consistency: ConsistencyPolicy,
    /// Status probes spent resolving one ambiguous mutation.
    pub reconcile_attempts: usize,
    pub delete_missing: DeleteMissing,
    pub rename_overwrite: RenameOverwrite,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            consistency: ConsistencyPolicy::default(),
            reconcile_attempts: 3,
            delete_missing: DeleteMissing::default(),
            rename_overwrite: RenameOverwrite::default(),
        }
    }
}

impl FsConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FsConfig = if content.trim().is_empty() {
            FsConfig::default()
        } else {
            serde_yaml_ng::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.min_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.min_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        if self.retry.factor < 1.0 {
            return Err(ConfigError::Invalid("retry.factor must be >= 1.0".into()));
        }
        if self.retry.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid("retry.attempt_timeout_ms must be positive".into()));
        }
        if self.consistency.max_polls == 0 {
            return Err(ConfigError::Invalid("consistency.max_polls must be at least 1".into()));
        }
        if self.reconcile_attempts == 0 {
            return Err(ConfigError::Invalid("reconcile_attempts must be at least 1".into()));
        }
        Ok(())
    }
}
