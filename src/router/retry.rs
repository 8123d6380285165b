//! Deterministic retry backoff for failed tasks.
//!
//! A failed, retry-eligible task is re-queued as `Pending` with a
//! `next_retry_at` computed here, so a retry never lands immediately on a
//! still-unhealthy agent.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy applied between retry attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
}

/// How the delay grows across attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed {
        delay_secs: u64,
    },
    Exponential {
        base_secs: u64,
        factor: u32,
        max_secs: u64,
    },
}

impl RetryPolicy {
    /// Delay to wait before the given attempt (1-based: the first retry is
    /// attempt 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        match self.strategy {
            BackoffStrategy::Fixed { delay_secs } => Duration::from_secs(delay_secs),
            BackoffStrategy::Exponential {
                base_secs,
                factor,
                max_secs,
            } => {
                let pow = (factor as u64).saturating_pow(exponent).max(1);
                Duration::from_secs(base_secs.saturating_mul(pow).min(max_secs))
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential {
                base_secs: 1,
                factor: 2,
                max_secs: 60,
            },
        }
    }
}
