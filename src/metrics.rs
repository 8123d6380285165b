//! Point-in-time metrics derived from router state.
//!
//! Nothing here keeps counters of its own: a [`MetricsSnapshot`] is computed
//! on demand from the task map and the agent registry, so it is always
//! consistent with what the router believes.

use crate::agents::AgentStatus;
use crate::router::Router;
use crate::tasks::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregate view of the mesh at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub generated_at: DateTime<Utc>,

    pub tasks_total: usize,
    pub tasks_pending: usize,
    pub tasks_blocked: usize,
    pub tasks_in_progress: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    /// completed / (completed + failed); `1.0` before any task finishes.
    pub success_rate: f64,
    /// Mean wall-clock processing time of completed tasks, in milliseconds.
    pub average_processing_ms: f64,
    /// Task counts keyed by task type, terminal and live alike.
    pub tasks_by_type: HashMap<String, u64>,

    pub agents_total: usize,
    pub agents_idle: usize,
    pub agents_busy: usize,
    pub agents_error: usize,
    pub agents_offline: usize,
}

impl MetricsSnapshot {
    /// Compute a snapshot from the router's current state.
    pub async fn collect(router: &Router) -> Self {
        let tasks = router.tasks_snapshot().await;
        let agents = router.agents_info().await;

        let mut pending = 0;
        let mut blocked = 0;
        let mut in_progress = 0;
        let mut completed = 0;
        let mut failed = 0;
        let mut by_type: HashMap<String, u64> = HashMap::new();
        let mut processing_ms_sum = 0.0;
        let mut processing_samples = 0u64;

        for task in &tasks {
            *by_type.entry(task.task_type.clone()).or_default() += 1;
            match task.status {
                TaskStatus::Pending => pending += 1,
                TaskStatus::Blocked => blocked += 1,
                TaskStatus::InProgress => in_progress += 1,
                TaskStatus::Completed => {
                    completed += 1;
                    if let Some(elapsed) = task.processing_time() {
                        processing_ms_sum += elapsed.num_milliseconds() as f64;
                        processing_samples += 1;
                    }
                }
                TaskStatus::Failed => failed += 1,
            }
        }

        let finished = completed + failed;
        let success_rate = if finished == 0 {
            1.0
        } else {
            completed as f64 / finished as f64
        };
        let average_processing_ms = if processing_samples == 0 {
            0.0
        } else {
            processing_ms_sum / processing_samples as f64
        };

        let mut idle = 0;
        let mut busy = 0;
        let mut error = 0;
        let mut offline = 0;
        for agent in &agents {
            match agent.status {
                AgentStatus::Idle => idle += 1,
                AgentStatus::Busy => busy += 1,
                AgentStatus::Error => error += 1,
                AgentStatus::Offline => offline += 1,
                AgentStatus::Initializing | AgentStatus::ShuttingDown => {}
            }
        }

        Self {
            generated_at: Utc::now(),
            tasks_total: tasks.len(),
            tasks_pending: pending,
            tasks_blocked: blocked,
            tasks_in_progress: in_progress,
            tasks_completed: completed,
            tasks_failed: failed,
            success_rate,
            average_processing_ms,
            tasks_by_type: by_type,
            agents_total: agents.len(),
            agents_idle: idle,
            agents_busy: busy,
            agents_error: error,
            agents_offline: offline,
        }
    }
}
