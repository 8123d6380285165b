//! Configuration for the router, supervisor, and scheduler.
//!
//! All interval/timeout knobs are plain seconds in the serialized form with
//! `Duration` accessors, and every config carries a `Default` plus a
//! `validate()` step. Configuration problems are fatal at initialize time and
//! never recoverable at runtime.

use crate::router::{RetryPolicy, SelectionStrategy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Router behavior: selection strategy, retry policy, dispatch bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Agent selection strategy applied to the filtered candidate list.
    pub strategy: SelectionStrategy,
    /// Attempts after which a failing task is terminally `Failed`.
    pub max_retries: u32,
    /// Backoff between retry attempts.
    pub retry_policy: RetryPolicy,
    /// Fallback agent id used when no registered agent declares a task's
    /// type. Usually a universal (`"*"`) agent.
    pub default_agent: Option<String>,
    /// Upper bound on a single `process_task` call.
    pub task_timeout_seconds: u64,
    /// Maximum queued (pending + blocked) tasks before submission is refused.
    pub max_queue_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::RoundRobin,
            max_retries: 3,
            retry_policy: RetryPolicy::default(),
            default_agent: None,
            task_timeout_seconds: 300,
            max_queue_size: 1000,
        }
    }
}

impl RouterConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::invalid("max_retries", "must be at least 1"));
        }
        if self.task_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "task_timeout_seconds",
                "must be non-zero",
            ));
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::invalid("max_queue_size", "must be non-zero"));
        }
        Ok(())
    }
}

/// Health-check loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between supervision cycles.
    pub check_interval_seconds: u64,
    /// Bound on a single status probe (and on restart sub-steps).
    pub probe_timeout_seconds: u64,
    /// Consecutive probe failures before an agent is taken offline.
    pub failure_threshold: u32,
    /// Restart attempts before an offline agent is left offline and reported.
    pub max_recovery_attempts: u32,
    /// Aggregate failure ratio above which the pool reports `Degraded`.
    pub error_rate_threshold: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 30,
            probe_timeout_seconds: 5,
            failure_threshold: 3,
            max_recovery_attempts: 3,
            error_rate_threshold: 0.5,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_seconds == 0 {
            return Err(ConfigError::invalid(
                "check_interval_seconds",
                "must be non-zero",
            ));
        }
        if self.probe_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "probe_timeout_seconds",
                "must be non-zero",
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "failure_threshold",
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(ConfigError::invalid(
                "error_rate_threshold",
                "must be within [0.0, 1.0]",
            ));
        }
        Ok(())
    }
}

/// Periodic synthetic-task producer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval between synthesized tasks.
    pub interval_seconds: u64,
    /// Task type injected on each tick.
    pub task_type: String,
    /// Description attached to synthesized tasks.
    pub description: String,
    /// Priority of synthesized tasks.
    pub priority: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
            task_type: "self_improvement".to_string(),
            description: "scheduled maintenance cycle".to_string(),
            priority: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds == 0 {
            return Err(ConfigError::invalid("interval_seconds", "must be non-zero"));
        }
        if self.task_type.trim().is_empty() {
            return Err(ConfigError::invalid("task_type", "must not be empty"));
        }
        Ok(())
    }
}

/// Top-level configuration for a [`Network`](crate::network::Network).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub router: RouterConfig,
    pub health: HealthConfig,
    /// Retention window for terminal tasks before the stale sweep evicts
    /// them.
    pub task_retention_seconds: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            health: HealthConfig::default(),
            task_retention_seconds: 3600,
        }
    }
}

impl NetworkConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_seconds)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parse from a TOML document.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: NetworkConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.router.validate()?;
        self.health.validate()?;
        if self.task_retention_seconds == 0 {
            return Err(ConfigError::invalid(
                "task_retention_seconds",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}
