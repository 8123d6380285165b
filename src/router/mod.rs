//! Task-to-agent routing and the dispatch/retry protocol.
//!
//! The [`Router`] owns the agent registry and the task map. It selects an
//! available, capability-matched agent for each task via the configured
//! [`SelectionStrategy`], dispatches `process_task`, and applies the retry
//! policy on failure. All task/agent mutation happens here; other components
//! observe outcomes through task state and [`NetworkEvent`]s.

pub mod retry;
pub mod strategy;

pub use retry::{BackoffStrategy, RetryPolicy};
pub use strategy::SelectionStrategy;

use crate::agents::{Agent, AgentEntry, AgentInfo, AgentStatus};
use crate::config::RouterConfig;
use crate::events::{NetworkEvent, EVENT_CHANNEL_CAPACITY};
use crate::tasks::{Task, TaskStatus};
use chrono::Utc;
use indexmap::IndexMap;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Errors surfaced by router operations. Routing "no capacity" is *not* an
/// error; it is [`RouteOutcome::NoCapacity`].
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task id already submitted: {0}")]
    DuplicateTask(String),

    #[error("task queue is full (limit {limit})")]
    QueueFull { limit: usize },

    #[error("task {task_id} is not routable in status {status}")]
    NotRoutable { task_id: String, status: TaskStatus },

    #[error("task {task_id} has unsatisfied dependencies")]
    DependenciesUnsatisfied { task_id: String },

    #[error("router is shutting down")]
    ShuttingDown,
}

/// Result of a single routing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The task was dispatched and completed successfully.
    Completed { task_id: String, agent_id: String },
    /// The dispatch failed; the task was re-queued if retry-eligible.
    Failed {
        task_id: String,
        agent_id: String,
        will_retry: bool,
    },
    /// No available, eligible agent right now; the task stays `Pending`.
    NoCapacity { task_id: String },
}

/// Maps tasks to agents and owns the dispatch/retry bookkeeping.
#[derive(Debug)]
pub struct Router {
    config: RouterConfig,
    /// Registry, insertion-ordered for round-robin and tie-breaks.
    agents: Arc<RwLock<IndexMap<String, AgentEntry>>>,
    tasks: Arc<RwLock<HashMap<String, Task>>>,
    /// Round-robin cursor, persisted across selections for fairness.
    cursor: AtomicUsize,
    /// Cleared when the owning network begins shutdown; no dispatch after.
    accepting: AtomicBool,
    event_sender: broadcast::Sender<NetworkEvent>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        let (event_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            agents: Arc::new(RwLock::new(IndexMap::new())),
            tasks: Arc::new(RwLock::new(HashMap::new())),
            cursor: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            event_sender,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.event_sender.subscribe()
    }

    pub(crate) fn emit(&self, event: NetworkEvent) {
        let _ = self.event_sender.send(event);
    }

    pub(crate) fn registry(&self) -> Arc<RwLock<IndexMap<String, AgentEntry>>> {
        Arc::clone(&self.agents)
    }

    pub(crate) fn task_map(&self) -> Arc<RwLock<HashMap<String, Task>>> {
        Arc::clone(&self.tasks)
    }

    pub(crate) fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    // ---- agent registry ------------------------------------------------

    /// Register an agent. A duplicate id is a warn-level no-op, not an error.
    /// Returns the agent id.
    pub async fn register_agent(&self, agent: Box<dyn Agent>) -> String {
        let (id, entry) = AgentEntry::new(agent);
        let mut agents = self.agents.write().await;
        if agents.contains_key(&id) {
            warn!(agent_id = %id, "agent already registered, ignoring");
            return id;
        }
        info!(
            agent_id = %id,
            name = %entry.name,
            capabilities = ?entry.capabilities,
            "registered agent"
        );
        let capabilities = entry.capabilities.clone();
        agents.insert(id.clone(), entry);
        drop(agents);
        self.emit(NetworkEvent::AgentAdded {
            agent_id: id.clone(),
            capabilities,
        });
        id
    }

    /// Remove an agent. Tasks currently assigned to it return to `Pending`
    /// with the assignment cleared. Returns whether the agent existed.
    pub async fn unregister_agent(&self, agent_id: &str) -> bool {
        let removed = {
            let mut agents = self.agents.write().await;
            agents.shift_remove(agent_id).is_some()
        };
        if !removed {
            warn!(agent_id, "unregister of unknown agent");
            return false;
        }

        let mut tasks = self.tasks.write().await;
        for task in tasks.values_mut() {
            if task.assigned_agent_id.as_deref() == Some(agent_id)
                && task.status == TaskStatus::InProgress
            {
                task.transition_to(TaskStatus::Pending);
                task.assigned_agent_id = None;
                task.started_at = None;
                debug!(task_id = %task.id, agent_id, "requeued task from unregistered agent");
            }
        }
        drop(tasks);

        info!(agent_id, "unregistered agent");
        self.emit(NetworkEvent::AgentRemoved {
            agent_id: agent_id.to_string(),
        });
        true
    }

    /// Snapshot of every registry entry.
    pub async fn agents_info(&self) -> Vec<AgentInfo> {
        let agents = self.agents.read().await;
        agents.iter().map(|(id, entry)| entry.info(id)).collect()
    }

    // ---- task submission -----------------------------------------------

    /// Queue a task. Tasks with unfinished dependencies enter `Blocked`;
    /// everything else stays `Pending` until routed.
    pub async fn submit(&self, mut task: Task) -> Result<Task, RouterError> {
        if !self.is_accepting() {
            return Err(RouterError::ShuttingDown);
        }
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(RouterError::DuplicateTask(task.id));
        }
        let queued = tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Blocked))
            .count();
        if queued >= self.config.max_queue_size {
            return Err(RouterError::QueueFull {
                limit: self.config.max_queue_size,
            });
        }
        if !task.dependencies.is_empty() && !dependencies_met(&tasks, &task) {
            task.transition_to(TaskStatus::Blocked);
        }
        debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = task.priority,
            status = %task.status,
            "submitted task"
        );
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    /// Look up a task by id.
    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Cancel a task. Valid only while `Pending`/`Blocked`/`InProgress`; the
    /// task transitions to `Failed` with a "cancelled" error kind. A dispatch
    /// already in flight is not interrupted; its late result is discarded.
    pub async fn cancel(&self, task_id: &str) -> Result<(), RouterError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| RouterError::TaskNotFound(task_id.to_string()))?;
        match task.status {
            TaskStatus::Pending | TaskStatus::Blocked | TaskStatus::InProgress => {
                task.transition_to(TaskStatus::Failed);
                task.error = Some("cancelled".to_string());
                task.finished_at = Some(Utc::now());
                task.assigned_agent_id = None;
                drop(tasks);
                info!(task_id, "cancelled task");
                self.emit(NetworkEvent::TaskFailed {
                    task_id: task_id.to_string(),
                    agent_id: None,
                    error: "cancelled".to_string(),
                    will_retry: false,
                });
                Ok(())
            }
            status => Err(RouterError::NotRoutable {
                task_id: task_id.to_string(),
                status,
            }),
        }
    }

    /// Snapshot of every task.
    pub async fn tasks_snapshot(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }

    // ---- selection -----------------------------------------------------

    /// Apply capability filtering and the configured strategy; returns the
    /// selected agent id without claiming it. `None` means "no capacity".
    pub async fn select_agent(&self, task: &Task) -> Option<String> {
        let agents = self.agents.read().await;
        self.pick_candidate(&agents, task)
    }

    fn pick_candidate(
        &self,
        agents: &IndexMap<String, AgentEntry>,
        task: &Task,
    ) -> Option<String> {
        let capable: Vec<&str> = agents
            .iter()
            .filter(|(_, entry)| entry.can_handle(&task.task_type))
            .map(|(id, _)| id.as_str())
            .collect();

        // Capability-aware fallback: nobody declares this task type at all.
        if capable.is_empty() {
            let default_id = self.config.default_agent.as_deref()?;
            let entry = agents.get(default_id)?;
            if agent_ready(entry) {
                return Some(default_id.to_string());
            }
            return None;
        }

        let candidates: Vec<&str> = capable
            .into_iter()
            .filter(|id| agents.get(*id).map_or(false, agent_ready))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let picked = match self.config.strategy {
            SelectionStrategy::RoundRobin => {
                let cursor = self.cursor.fetch_add(1, Ordering::SeqCst);
                candidates[cursor % candidates.len()]
            }
            SelectionStrategy::LeastLoaded => candidates
                .iter()
                .copied()
                .min_by_key(|id| agents[*id].metrics.tasks_processed)?,
            SelectionStrategy::Random => {
                candidates[rand::thread_rng().gen_range(0..candidates.len())]
            }
        };
        Some(picked.to_string())
    }

    /// Select and atomically mark the chosen entry `Busy`.
    async fn claim_agent(
        &self,
        task: &Task,
    ) -> Option<(String, Arc<Mutex<Box<dyn Agent>>>)> {
        let mut agents = self.agents.write().await;
        let agent_id = self.pick_candidate(&agents, task)?;
        let entry = agents.get_mut(&agent_id)?;
        entry.status = AgentStatus::Busy;
        Some((agent_id, Arc::clone(&entry.agent)))
    }

    // ---- routing -------------------------------------------------------

    /// Route a pending task to an agent and drive the dispatch to its
    /// outcome. Execution errors are absorbed into task state and events,
    /// never propagated as `Err`.
    pub async fn route_task(&self, task_id: &str) -> Result<RouteOutcome, RouterError> {
        if !self.is_accepting() {
            return Err(RouterError::ShuttingDown);
        }
        let task = {
            let tasks = self.tasks.read().await;
            let task = tasks
                .get(task_id)
                .ok_or_else(|| RouterError::TaskNotFound(task_id.to_string()))?;
            if task.status != TaskStatus::Pending {
                return Err(RouterError::NotRoutable {
                    task_id: task_id.to_string(),
                    status: task.status,
                });
            }
            if !dependencies_met(&tasks, task) {
                return Err(RouterError::DependenciesUnsatisfied {
                    task_id: task_id.to_string(),
                });
            }
            task.clone()
        };

        let Some((agent_id, agent)) = self.claim_agent(&task).await else {
            debug!(task_id, task_type = %task.task_type, "no capacity for task");
            return Ok(RouteOutcome::NoCapacity {
                task_id: task.id,
            });
        };

        // The task may have been cancelled or evicted between selection and
        // here; release the claimed agent instead of dispatching.
        let dispatched = {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(task_id) {
                Some(entry) => {
                    if entry.transition_to(TaskStatus::InProgress) {
                        entry.assigned_agent_id = Some(agent_id.clone());
                        entry.started_at = Some(Utc::now());
                        entry.next_retry_at = None;
                        None
                    } else {
                        Some(Err(RouterError::NotRoutable {
                            task_id: task_id.to_string(),
                            status: entry.status,
                        }))
                    }
                }
                None => Some(Err(RouterError::TaskNotFound(task_id.to_string()))),
            }
        };
        if let Some(result) = dispatched {
            let mut agents = self.agents.write().await;
            if let Some(entry) = agents.get_mut(&agent_id) {
                if entry.status == AgentStatus::Busy {
                    entry.status = AgentStatus::Idle;
                }
            }
            return result;
        }
        debug!(task_id, agent_id = %agent_id, "assigned task");
        self.emit(NetworkEvent::TaskAssigned {
            task_id: task.id.clone(),
            agent_id: agent_id.clone(),
        });

        // The only long-running await on the hot path; no registry lock held.
        let started = Instant::now();
        let result = {
            let mut guard = agent.lock().await;
            match tokio::time::timeout(
                self.config.task_timeout(),
                guard.process_task(task.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(crate::agents::AgentError::Timeout {
                    timeout_secs: self.config.task_timeout_seconds,
                }),
            }
        };
        let duration = started.elapsed();

        match result {
            Ok(value) => Ok(self
                .finish_success(&task.id, &agent_id, value, duration)
                .await),
            Err(err) => Ok(self
                .finish_failure(&task.id, &agent_id, &err.to_string(), duration)
                .await),
        }
    }

    /// Promote `Blocked` tasks whose dependencies are now complete, then
    /// route the best eligible pending task. Returns `None` when the queue
    /// holds nothing routable.
    pub async fn route_next_task(&self) -> Option<RouteOutcome> {
        self.promote_blocked_tasks().await;
        let task_id = self.next_task_to_process().await?;
        match self.route_task(&task_id).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "routing attempt failed");
                None
            }
        }
    }

    /// The `Pending` task with the highest priority whose dependencies are
    /// satisfied and whose backoff has elapsed; FIFO within a priority band.
    pub async fn next_task_to_process(&self) -> Option<String> {
        self.next_task_excluding(&HashSet::new()).await
    }

    /// [`next_task_to_process`](Self::next_task_to_process) with a skip set,
    /// so a queue-draining pass can move past tasks that just found no
    /// capacity instead of re-picking them forever.
    pub(crate) async fn next_task_excluding(&self, excluded: &HashSet<String>) -> Option<String> {
        let tasks = self.tasks.read().await;
        let now = Utc::now();
        let mut best: Option<&Task> = None;
        for task in tasks.values() {
            if excluded.contains(&task.id)
                || task.status != TaskStatus::Pending
                || !task.retry_elapsed(now)
                || !dependencies_met(&tasks, task)
            {
                continue;
            }
            best = match best {
                None => Some(task),
                Some(current)
                    if task.priority > current.priority
                        || (task.priority == current.priority
                            && task.created_at < current.created_at) =>
                {
                    Some(task)
                }
                Some(current) => Some(current),
            };
        }
        best.map(|task| task.id.clone())
    }

    /// Move `Blocked` tasks with fully completed dependencies back to
    /// `Pending`. Returns the number promoted.
    pub async fn promote_blocked_tasks(&self) -> usize {
        let mut tasks = self.tasks.write().await;
        let ready: Vec<String> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Blocked && dependencies_met(&tasks, t))
            .map(|t| t.id.clone())
            .collect();
        for id in &ready {
            if let Some(task) = tasks.get_mut(id) {
                task.transition_to(TaskStatus::Pending);
                debug!(task_id = %id, "dependencies satisfied, task unblocked");
            }
        }
        ready.len()
    }

    // ---- outcome bookkeeping -------------------------------------------

    async fn finish_success(
        &self,
        task_id: &str,
        agent_id: &str,
        value: serde_json::Value,
        duration: std::time::Duration,
    ) -> RouteOutcome {
        {
            let mut agents = self.agents.write().await;
            if let Some(entry) = agents.get_mut(agent_id) {
                if entry.status == AgentStatus::Busy {
                    entry.status = AgentStatus::Idle;
                }
                entry.metrics.record(true, duration);
                entry.last_heartbeat = Utc::now();
            }
        }
        {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(task_id) {
                Some(task)
                    if task.status == TaskStatus::InProgress
                        && task.assigned_agent_id.as_deref() == Some(agent_id) =>
                {
                    task.transition_to(TaskStatus::Completed);
                    task.finished_at = Some(Utc::now());
                    task.result = Some(value);
                    task.error = None;
                }
                _ => {
                    // Cancelled, requeued, or evicted while in flight.
                    warn!(task_id, agent_id, "discarding late task result");
                }
            }
        }
        info!(task_id, agent_id, duration_ms = duration.as_millis() as u64, "task completed");
        self.emit(NetworkEvent::TaskCompleted {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            duration_ms: duration.as_millis() as u64,
        });
        RouteOutcome::Completed {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
        }
    }

    async fn finish_failure(
        &self,
        task_id: &str,
        agent_id: &str,
        error: &str,
        duration: std::time::Duration,
    ) -> RouteOutcome {
        {
            let mut agents = self.agents.write().await;
            if let Some(entry) = agents.get_mut(agent_id) {
                if entry.status == AgentStatus::Busy {
                    entry.status = AgentStatus::Error;
                }
                entry.record_error(error);
                entry.metrics.record(false, duration);
                entry.last_heartbeat = Utc::now();
            }
        }
        self.emit(NetworkEvent::AgentError {
            agent_id: agent_id.to_string(),
            error: error.to_string(),
        });

        let will_retry = {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(task_id) {
                Some(task)
                    if task.status == TaskStatus::InProgress
                        && task.assigned_agent_id.as_deref() == Some(agent_id) =>
                {
                    task.attempts += 1;
                    task.error = Some(error.to_string());
                    task.transition_to(TaskStatus::Failed);
                    if task.attempts < self.config.max_retries {
                        // Retry edge: back to Pending with backoff.
                        task.transition_to(TaskStatus::Pending);
                        task.assigned_agent_id = None;
                        task.started_at = None;
                        let delay = self.config.retry_policy.delay_for(task.attempts);
                        let delay = chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::days(365));
                        task.next_retry_at = Some(Utc::now() + delay);
                        true
                    } else {
                        task.finished_at = Some(Utc::now());
                        false
                    }
                }
                _ => {
                    warn!(task_id, agent_id, "discarding late task failure");
                    false
                }
            }
        };

        warn!(task_id, agent_id, error, will_retry, "task failed");
        self.emit(NetworkEvent::TaskFailed {
            task_id: task_id.to_string(),
            agent_id: Some(agent_id.to_string()),
            error: error.to_string(),
            will_retry,
        });
        RouteOutcome::Failed {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            will_retry,
        }
    }
}

/// Every dependency present and `Completed`. A missing dependency id can
/// never complete, so it keeps the task ineligible.
fn dependencies_met(tasks: &HashMap<String, Task>, task: &Task) -> bool {
    task.dependencies
        .iter()
        .all(|dep| tasks.get(dep).map_or(false, |t| t.status == TaskStatus::Completed))
}

/// Selectable and willing: registry status `Idle` and the agent object
/// reports availability. `try_lock` keeps this non-blocking; a held mutex
/// means a dispatch is somehow in flight, so the agent is not ready.
pub(crate) fn agent_ready(entry: &AgentEntry) -> bool {
    if !entry.is_selectable() {
        return false;
    }
    match entry.agent.try_lock() {
        Ok(guard) => guard.is_available(),
        Err(_) => false,
    }
}
