//! Task data model.
//!
//! A [`Task`] is the unit of work flowing through the mesh: immutable identity,
//! mutable lifecycle status. Tasks are created by producers (external callers or
//! the [`Scheduler`](crate::scheduler::Scheduler)) and mutated only by the
//! [`Router`](crate::router::Router).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a task.
///
/// Transitions are monotonic except for the `Failed -> Pending` retry edge,
/// which the router allows only while the attempt count is below the
/// configured retry limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Queued and eligible for routing once dependencies are satisfied.
    Pending,
    /// Dispatched to an agent; exactly one agent is working on it.
    InProgress,
    /// Finished successfully. Terminal.
    Completed,
    /// Finished unsuccessfully (or cancelled). Terminal unless retried.
    Failed,
    /// Waiting on unfinished dependencies.
    Blocked,
}

impl TaskStatus {
    /// Whether a transition from `self` to `next` is permitted.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Blocked)
                | (Pending, Failed) // cancellation
                | (Blocked, Pending)
                | (Blocked, Failed) // cancellation
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Pending) // requeue when the assigned agent goes away
                | (Failed, Pending) // retry edge, attempt-bounded by the router
        )
    }

    /// Terminal statuses are eligible for the stale-task sweep.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// A unit of work with a type, priority, and lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque unique identifier (UUID v4 unless supplied).
    pub id: String,
    /// Open-set task kind; matched against agent capabilities for routing.
    pub task_type: String,
    /// Human-readable description of the work.
    pub description: String,
    /// Higher values are routed first.
    pub priority: i64,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp; drives the stale-task retention window.
    pub updated_at: DateTime<Utc>,
    /// Ids of tasks that must be `Completed` before this one is routable.
    pub dependencies: HashSet<String>,
    /// Open key/value bag carried alongside the task.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Agent currently (or last) assigned to this task.
    pub assigned_agent_id: Option<String>,
    /// Number of failed processing attempts so far.
    pub attempts: u32,
    /// When the current/last dispatch began.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Earliest time a retry-eligible task may be re-routed (backoff).
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Opaque payload returned by the processing agent.
    pub result: Option<serde_json::Value>,
    /// Last error message, if any attempt failed.
    pub error: Option<String>,
}

impl Task {
    /// Create a new pending task with a generated id and default priority.
    pub fn new(task_type: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            description: description.into(),
            priority: 0,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            dependencies: HashSet::new(),
            metadata: HashMap::new(),
            assigned_agent_id: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
            next_retry_at: None,
            result: None,
            error: None,
        }
    }

    /// Override the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the routing priority (higher = more urgent).
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Add a dependency on another task id.
    pub fn with_dependency(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.insert(task_id.into());
        self
    }

    /// Replace the dependency set.
    pub fn with_dependencies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the task is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the backoff window (if any) has elapsed.
    pub fn retry_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at.map_or(true, |at| at <= now)
    }

    /// Wall-clock processing time for a finished dispatch, if known.
    pub fn processing_time(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Apply a status transition, refreshing `updated_at`.
    ///
    /// Returns `false` (leaving the task untouched) when the transition is not
    /// permitted by [`TaskStatus::can_transition_to`].
    pub(crate) fn transition_to(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }
}
