//! Agent abstractions and registry-entry state.
//!
//! An [`Agent`] is a pluggable worker capable of processing one or more task
//! types. Concrete agents (code generators, sandbox executors, message
//! handlers) live outside this crate and implement the trait; the router and
//! supervisor only see the capability surface defined here.

use crate::tasks::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Capability tag that marks an agent as able to process any task type.
pub const UNIVERSAL_CAPABILITY: &str = "*";

/// Recent-error history kept per registry entry.
const MAX_RECENT_ERRORS: usize = 16;

/// Core trait that all agents must implement.
///
/// At most one `process_task` call is in flight per agent at a time; the
/// router enforces this through the registry's `Busy` status and the
/// per-agent mutex, so implementations may assume sequential processing.
#[async_trait::async_trait]
pub trait Agent: Send + Sync + fmt::Debug {
    /// The agent's unique identifier.
    fn id(&self) -> &str;

    /// Human-readable agent name.
    fn name(&self) -> &str;

    /// Task types (or free-form tags) this agent can process.
    /// [`UNIVERSAL_CAPABILITY`] declares the agent universal.
    fn capabilities(&self) -> Vec<String>;

    /// Whether the agent is willing to accept work right now.
    fn is_available(&self) -> bool;

    /// Process a task, returning an opaque result payload.
    async fn process_task(&mut self, task: Task) -> Result<serde_json::Value, AgentError>;

    /// Cheap status probe used by the supervisor's health loop.
    async fn get_status(&self) -> AgentHealth;

    /// Return the agent to a clean idle state after an error or restart.
    async fn reset(&mut self) -> Result<(), AgentError>;

    /// Shut the agent down gracefully.
    async fn shutdown(&mut self) -> Result<(), AgentError>;
}

/// Registry-visible status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentStatus {
    /// Registered but not yet confirmed healthy by a probe.
    Initializing,
    /// Ready to accept a task.
    Idle,
    /// Exactly one `process_task` call is outstanding.
    Busy,
    /// Last dispatch failed; excluded from selection until reset.
    Error,
    /// Repeated probe failures; excluded from selection until restarted.
    Offline,
    /// Shutdown has begun; no further dispatch.
    ShuttingDown,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Initializing => write!(f, "initializing"),
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Offline => write!(f, "offline"),
            AgentStatus::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Result of an agent status probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub healthy: bool,
    pub last_active: DateTime<Utc>,
    pub errors: Vec<String>,
}

impl AgentHealth {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            last_active: Utc::now(),
            errors: Vec::new(),
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            last_active: Utc::now(),
            errors: vec![error.into()],
        }
    }
}

/// Per-agent processing statistics maintained by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Successfully processed task count.
    pub tasks_processed: u64,
    /// Failed dispatch count.
    pub tasks_failed: u64,
    /// tasks_processed / (tasks_processed + tasks_failed).
    pub success_rate: f64,
    /// Running mean of dispatch wall time, in seconds.
    pub average_processing_time: f64,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self {
            tasks_processed: 0,
            tasks_failed: 0,
            success_rate: 1.0,
            average_processing_time: 0.0,
        }
    }
}

impl AgentMetrics {
    /// Fold one finished dispatch into the running statistics.
    pub fn record(&mut self, success: bool, duration: std::time::Duration) {
        if success {
            self.tasks_processed += 1;
        } else {
            self.tasks_failed += 1;
        }
        let total = self.tasks_processed + self.tasks_failed;
        self.success_rate = self.tasks_processed as f64 / total as f64;
        let current = self.average_processing_time;
        self.average_processing_time =
            (current * (total - 1) as f64 + duration.as_secs_f64()) / total as f64;
    }
}

/// Errors raised by agent implementations or the dispatch path around them.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("task execution failed: {0}")]
    ExecutionFailed(String),

    #[error("agent is not available: {status}")]
    Unavailable { status: AgentStatus },

    #[error("unsupported task type: {task_type}")]
    UnsupportedTaskType { task_type: String },

    #[error("task timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("health probe failed: {0}")]
    HealthProbe(String),

    #[error("reset failed: {0}")]
    ResetFailed(String),

    #[error("shutdown failed: {0}")]
    ShutdownFailed(String),
}

/// Registry entry owned by the router: the agent object plus the supervised
/// state nobody else may mutate.
#[derive(Debug)]
pub struct AgentEntry {
    /// The agent itself. The mutex doubles as the in-flight dispatch guard.
    pub agent: Arc<Mutex<Box<dyn Agent>>>,
    pub name: String,
    /// Capability set cached at registration time.
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    /// Bounded list of recent failure messages.
    pub recent_errors: VecDeque<String>,
    pub metrics: AgentMetrics,
    /// Consecutive failed health probes.
    pub probe_failures: u32,
    /// Restart attempts made since the agent last went unhealthy.
    pub recovery_attempts: u32,
}

impl AgentEntry {
    /// Wrap a freshly registered agent. Returns the agent id alongside the
    /// entry since the boxed agent is moved behind the mutex.
    pub fn new(agent: Box<dyn Agent>) -> (String, Self) {
        let id = agent.id().to_string();
        let name = agent.name().to_string();
        let capabilities = agent.capabilities();
        let entry = Self {
            agent: Arc::new(Mutex::new(agent)),
            name,
            capabilities,
            status: AgentStatus::Idle,
            last_heartbeat: Utc::now(),
            recent_errors: VecDeque::new(),
            metrics: AgentMetrics::default(),
            probe_failures: 0,
            recovery_attempts: 0,
        };
        (id, entry)
    }

    /// Whether the entry may appear in a selection candidate list.
    /// Availability of the agent object itself is checked separately.
    pub fn is_selectable(&self) -> bool {
        self.status == AgentStatus::Idle
    }

    /// Whether this agent declares the given task type (or is universal).
    pub fn can_handle(&self, task_type: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c == task_type || c == UNIVERSAL_CAPABILITY)
    }

    /// Append to the bounded recent-error list.
    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.recent_errors.len() >= MAX_RECENT_ERRORS {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(message.into());
    }

    /// Clear failure counters after a successful restart.
    pub fn mark_recovered(&mut self) {
        self.status = AgentStatus::Idle;
        self.probe_failures = 0;
        self.recovery_attempts = 0;
        self.last_heartbeat = Utc::now();
    }

    /// Read-only view for callers outside the router.
    pub fn info(&self, id: &str) -> AgentInfo {
        AgentInfo {
            id: id.to_string(),
            name: self.name.clone(),
            status: self.status,
            capabilities: self.capabilities.clone(),
            last_heartbeat: self.last_heartbeat,
            recent_errors: self.recent_errors.iter().cloned().collect(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Snapshot of a registry entry for observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    pub capabilities: Vec<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub recent_errors: Vec<String>,
    pub metrics: AgentMetrics,
}
