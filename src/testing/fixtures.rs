//! Canned tasks and configurations for tests.

use crate::config::{HealthConfig, NetworkConfig, RouterConfig};
use crate::router::{BackoffStrategy, RetryPolicy};
use crate::tasks::Task;

/// Factory for commonly shaped test tasks.
pub struct TaskFixtures;

impl TaskFixtures {
    /// A pending task of the given type and priority.
    pub fn task(task_type: &str, priority: i64) -> Task {
        Task::new(task_type, format!("test {task_type} task")).with_priority(priority)
    }

    /// A dependency chain `t-0 <- t-1 <- ... <- t-(n-1)`, each task depending
    /// on the previous one.
    pub fn chain(task_type: &str, n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| {
                let task = Self::task(task_type, 0).with_id(format!("t-{i}"));
                if i == 0 {
                    task
                } else {
                    task.with_dependency(format!("t-{}", i - 1))
                }
            })
            .collect()
    }
}

/// Factory for configurations tuned for fast tests.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// Network config with sub-second supervision timings and zero-delay
    /// retries, so tests never sleep on production defaults.
    pub fn fast_network() -> NetworkConfig {
        NetworkConfig {
            router: Self::fast_router(),
            health: HealthConfig {
                check_interval_seconds: 1,
                probe_timeout_seconds: 1,
                failure_threshold: 2,
                max_recovery_attempts: 2,
                error_rate_threshold: 0.5,
            },
            task_retention_seconds: 1,
        }
    }

    /// Router config with an immediate retry window.
    pub fn fast_router() -> RouterConfig {
        RouterConfig {
            retry_policy: RetryPolicy {
                strategy: BackoffStrategy::Fixed { delay_secs: 0 },
            },
            ..RouterConfig::default()
        }
    }
}
