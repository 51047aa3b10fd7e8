//! Tunables for every subsystem, loadable from JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration load and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    /// Config document is not valid JSON for [`CoreConfig`].
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// Values parsed but violate a constraint.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// In-process sync mutex settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutexConfig {
    /// Hold time after which a completed operation is reported as slow.
    pub slow_operation_ms: u64,
}

impl MutexConfig {
    /// Slow-operation threshold as a [`Duration`].
    pub fn slow_operation_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_operation_ms)
    }
}

impl Default for MutexConfig {
    fn default() -> Self {
        Self {
            slow_operation_ms: 30_000,
        }
    }
}

/// Distributed edit-lock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// A lock whose last heartbeat is older than this is expired.
    pub ttl_ms: u64,
    /// Period between heartbeat renewals.
    pub heartbeat_interval_ms: u64,
}

impl LockConfig {
    /// Heartbeat period as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 60_000,
            heartbeat_interval_ms: 5_000,
        }
    }
}

/// Offline work queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Buffered capacity of the queue event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { event_capacity: 256 }
    }
}

/// Balance validation tolerances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Allowed absolute drift between actual and virtual + unassigned.
    pub epsilon: f64,
    /// Unassigned cash below this value raises a warning.
    pub large_negative_threshold: f64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.01,
            large_negative_threshold: -1_000.0,
        }
    }
}

/// Top-level configuration for the sync core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Sync mutex settings.
    pub mutex: MutexConfig,
    /// Edit-lock settings.
    pub lock: LockConfig,
    /// Offline queue settings.
    pub queue: QueueConfig,
    /// Balance validation settings.
    pub balance: BalanceConfig,
}

impl CoreConfig {
    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "lock.heartbeat_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.lock.heartbeat_interval_ms >= self.lock.ttl_ms {
            return Err(ConfigError::Invalid(format!(
                "lock.heartbeat_interval_ms ({}) must be shorter than lock.ttl_ms ({})",
                self.lock.heartbeat_interval_ms, self.lock.ttl_ms
            )));
        }
        if self.queue.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue.event_capacity must be non-zero".to_string(),
            ));
        }
        if !self.balance.epsilon.is_finite() || self.balance.epsilon < 0.0 {
            return Err(ConfigError::Invalid(
                "balance.epsilon must be a non-negative finite number".to_string(),
            ));
        }
        Ok(())
    }
}
