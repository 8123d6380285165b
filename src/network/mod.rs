//! Network facade and the supervision loop.
//!
//! A [`Network`] owns a [`Router`] and layers lifecycle management on top:
//! a periodic health-check cycle that probes agents, takes repeat offenders
//! offline, restarts them within a bounded budget, drains the pending queue,
//! and sweeps stale terminal tasks. Callers interact with the mesh through
//! this type; the router stays an implementation detail for most of them.

use crate::agents::{Agent, AgentError, AgentInfo, AgentStatus};
use crate::config::{HealthConfig, NetworkConfig};
use crate::error::{MeshError, MeshResult};
use crate::events::NetworkEvent;
use crate::metrics::MetricsSnapshot;
use crate::router::{agent_ready, RouteOutcome, Router};
use crate::tasks::Task;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Aggregate health of the agent pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every agent is healthy and at least one can take work.
    Healthy,
    /// Capacity exists but at least one agent is impaired, or the aggregate
    /// error rate exceeds the configured threshold.
    Degraded,
    /// No agent can take work at all.
    Critical,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Result of a [`Network::check_health`] pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub generated_at: chrono::DateTime<Utc>,
    pub agents_total: usize,
    /// Agents that can take work now or are already working (`Busy`).
    pub agents_available: usize,
    /// Agents in `Error`/`Offline`, or `Idle` but refusing work.
    pub agents_unhealthy: usize,
    /// Aggregate failed / finished dispatch ratio across the pool.
    pub error_rate: f64,
}

struct SupervisorHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// The agent mesh: router plus supervision.
pub struct Network {
    config: NetworkConfig,
    router: Arc<Router>,
    running: AtomicBool,
    supervisor: Mutex<Option<SupervisorHandle>>,
}

impl Network {
    /// Build a network from a validated configuration.
    pub fn new(config: NetworkConfig) -> MeshResult<Self> {
        config.validate()?;
        let router = Arc::new(Router::new(config.router.clone()));
        Ok(Self {
            config,
            router,
            running: AtomicBool::new(false),
            supervisor: Mutex::new(None),
        })
    }

    /// Build a network from a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> MeshResult<Self> {
        Self::new(NetworkConfig::from_file(path)?)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// The underlying router, for callers that need routing control beyond
    /// the facade.
    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.router)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.router.subscribe()
    }

    // ---- delegated router surface --------------------------------------

    pub async fn add_agent(&self, agent: Box<dyn Agent>) -> String {
        self.router.register_agent(agent).await
    }

    pub async fn remove_agent(&self, agent_id: &str) -> bool {
        self.router.unregister_agent(agent_id).await
    }

    pub async fn submit_task(&self, task: Task) -> MeshResult<Task> {
        Ok(self.router.submit(task).await?)
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.router.get_task(task_id).await
    }

    pub async fn cancel_task(&self, task_id: &str) -> MeshResult<()> {
        Ok(self.router.cancel(task_id).await?)
    }

    pub async fn agents(&self) -> Vec<AgentInfo> {
        self.router.agents_info().await
    }

    // ---- lifecycle -----------------------------------------------------

    /// Start the supervision loop. Idempotent; a second call while running
    /// is a warn-level no-op.
    pub async fn initialize(&self) -> MeshResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("network already initialized");
            return Ok(());
        }
        if self.router.agents_info().await.is_empty() {
            warn!("initializing with no registered agents; health is critical until one is added");
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(supervise(
            Arc::clone(&self.router),
            self.config.clone(),
            token.clone(),
        ));
        *self.supervisor.lock().await = Some(SupervisorHandle { token, handle });
        info!(
            check_interval_s = self.config.health.check_interval_seconds,
            "network initialized"
        );
        Ok(())
    }

    /// Stop the supervision loop, refuse further submissions, and shut every
    /// agent down. Idempotent.
    pub async fn shutdown(&self) {
        self.router.stop_accepting();
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(supervisor) = self.supervisor.lock().await.take() {
            supervisor.token.cancel();
            if let Err(err) = supervisor.handle.await {
                warn!(error = %err, "supervision task did not stop cleanly");
            }
        }

        let agents: Vec<(String, Arc<Mutex<Box<dyn Agent>>>)> = {
            let registry = self.router.registry();
            let mut registry = registry.write().await;
            registry
                .iter_mut()
                .map(|(id, entry)| {
                    entry.status = AgentStatus::ShuttingDown;
                    (id.clone(), Arc::clone(&entry.agent))
                })
                .collect()
        };
        for (agent_id, agent) in agents {
            let result = timeout(self.config.health.probe_timeout(), async {
                let mut guard = agent.lock().await;
                guard.shutdown().await
            })
            .await;
            match result {
                Ok(Ok(())) => debug!(agent_id = %agent_id, "agent shut down"),
                Ok(Err(err)) => warn!(agent_id = %agent_id, error = %err, "agent shutdown failed"),
                Err(_) => warn!(agent_id = %agent_id, "agent shutdown timed out"),
            }
        }
        info!("network shut down");
    }

    // ---- supervision, callable directly --------------------------------

    /// One-shot health assessment of the agent pool.
    pub async fn check_health(&self) -> HealthReport {
        let registry = self.router.registry();
        let agents = registry.read().await;

        let mut available = 0;
        let mut unhealthy = 0;
        let mut processed = 0u64;
        let mut failed = 0u64;
        for entry in agents.values() {
            processed += entry.metrics.tasks_processed;
            failed += entry.metrics.tasks_failed;
            match entry.status {
                AgentStatus::Busy => available += 1,
                AgentStatus::Idle => {
                    if agent_ready(entry) {
                        available += 1;
                    } else {
                        unhealthy += 1;
                    }
                }
                AgentStatus::Error | AgentStatus::Offline => unhealthy += 1,
                AgentStatus::Initializing | AgentStatus::ShuttingDown => {}
            }
        }
        let total = agents.len();
        drop(agents);

        let finished = processed + failed;
        let error_rate = if finished == 0 {
            0.0
        } else {
            failed as f64 / finished as f64
        };
        let status = if total == 0 || available == 0 {
            HealthStatus::Critical
        } else if unhealthy > 0 || error_rate > self.config.health.error_rate_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        HealthReport {
            status,
            generated_at: Utc::now(),
            agents_total: total,
            agents_available: available,
            agents_unhealthy: unhealthy,
            error_rate,
        }
    }

    /// Current aggregate metrics.
    pub async fn get_metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot::collect(&self.router).await
    }

    /// Restart a single agent: shutdown, then reset, each bounded by the
    /// probe timeout. Refused while the agent has a dispatch in flight.
    pub async fn restart_agent(&self, agent_id: &str) -> MeshResult<()> {
        try_restart(&self.router, &self.config.health, agent_id).await
    }

    /// Swap an agent for a replacement without a service gap: the new agent
    /// is registered before the old one's shutdown is awaited. In-flight
    /// tasks of the old agent are requeued. Returns the new agent's id.
    pub async fn replace_agent(
        &self,
        agent_id: &str,
        replacement: Box<dyn Agent>,
    ) -> MeshResult<String> {
        let old_entry = {
            let registry = self.router.registry();
            let mut registry = registry.write().await;
            registry
                .shift_remove(agent_id)
                .ok_or_else(|| MeshError::AgentNotFound(agent_id.to_string()))?
        };

        let new_id = self.router.register_agent(replacement).await;

        // Requeue whatever the old agent was working on.
        {
            let tasks = self.router.task_map();
            let mut tasks = tasks.write().await;
            for task in tasks.values_mut() {
                if task.assigned_agent_id.as_deref() == Some(agent_id)
                    && task.status == crate::tasks::TaskStatus::InProgress
                {
                    task.transition_to(crate::tasks::TaskStatus::Pending);
                    task.assigned_agent_id = None;
                    task.started_at = None;
                }
            }
        }
        self.router.emit(NetworkEvent::AgentRemoved {
            agent_id: agent_id.to_string(),
        });

        // Old agent winds down off the critical path.
        let old_id = agent_id.to_string();
        let probe_timeout = self.config.health.probe_timeout();
        tokio::spawn(async move {
            let result = timeout(probe_timeout, async {
                let mut guard = old_entry.agent.lock().await;
                guard.shutdown().await
            })
            .await;
            match result {
                Ok(Ok(())) => debug!(agent_id = %old_id, "replaced agent shut down"),
                Ok(Err(err)) => {
                    warn!(agent_id = %old_id, error = %err, "replaced agent shutdown failed")
                }
                Err(_) => warn!(agent_id = %old_id, "replaced agent shutdown timed out"),
            }
        });

        info!(old = %agent_id, new = %new_id, "replaced agent");
        Ok(new_id)
    }

    /// Evict terminal tasks older than the retention window. Returns the
    /// number evicted; idempotent within a window.
    pub async fn cleanup_stale_tasks(&self) -> usize {
        sweep_stale(&self.router, &self.config).await
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("running", &self.is_running())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---- supervision internals ---------------------------------------------

async fn supervise(router: Arc<Router>, config: NetworkConfig, token: CancellationToken) {
    let mut ticker = interval(config.health.check_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval fires immediately; skip the zeroth tick so the first cycle
    // runs a full interval after startup.
    ticker.tick().await;

    info!("supervision loop started");
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                run_cycle(&router, &config).await;
            }
        }
    }
    info!("supervision loop stopped");
}

/// One supervision cycle: probe, recover, route, sweep.
async fn run_cycle(router: &Router, config: &NetworkConfig) {
    probe_agents(router, &config.health).await;
    recover_agents(router, &config.health).await;
    drain_pending(router).await;
    let evicted = sweep_stale(router, config).await;
    if evicted > 0 {
        debug!(evicted, "swept stale tasks");
    }
}

async fn probe_agents(router: &Router, health: &HealthConfig) {
    let snapshot: Vec<(String, Arc<Mutex<Box<dyn Agent>>>, AgentStatus)> = {
        let registry = router.registry();
        let registry = registry.read().await;
        registry
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(&entry.agent), entry.status))
            .collect()
    };

    for (agent_id, agent, status) in snapshot {
        if status == AgentStatus::ShuttingDown {
            continue;
        }

        // A held dispatch mutex means work is in flight; that is proof of
        // life, so refresh the heartbeat instead of blocking on a probe.
        let guard = match agent.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let registry = router.registry();
                let mut registry = registry.write().await;
                if let Some(entry) = registry.get_mut(&agent_id) {
                    entry.probe_failures = 0;
                    entry.last_heartbeat = Utc::now();
                }
                continue;
            }
        };

        let probe = timeout(health.probe_timeout(), guard.get_status()).await;
        drop(guard);
        let verdict = match probe {
            Ok(report) if report.healthy => Ok(()),
            Ok(report) => Err(if report.errors.is_empty() {
                "agent reported unhealthy".to_string()
            } else {
                report.errors.join("; ")
            }),
            Err(_) => Err(format!(
                "health probe timed out after {}s",
                health.probe_timeout_seconds
            )),
        };

        let went_offline = {
            let registry = router.registry();
            let mut registry = registry.write().await;
            let Some(entry) = registry.get_mut(&agent_id) else {
                continue;
            };
            match verdict {
                Ok(()) => {
                    entry.probe_failures = 0;
                    entry.last_heartbeat = Utc::now();
                    if entry.status == AgentStatus::Initializing {
                        entry.status = AgentStatus::Idle;
                    }
                    None
                }
                Err(message) => {
                    entry.probe_failures += 1;
                    entry.record_error(&message);
                    warn!(
                        agent_id = %agent_id,
                        failures = entry.probe_failures,
                        threshold = health.failure_threshold,
                        error = %message,
                        "health probe failed"
                    );
                    if entry.probe_failures >= health.failure_threshold
                        && entry.status != AgentStatus::Offline
                    {
                        entry.status = AgentStatus::Offline;
                        Some(message)
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(message) = went_offline {
            error!(agent_id = %agent_id, "agent taken offline after repeated probe failures");
            router.emit(NetworkEvent::AgentError {
                agent_id,
                error: message,
            });
        }
    }
}

async fn recover_agents(router: &Router, health: &HealthConfig) {
    let candidates: Vec<String> = {
        let registry = router.registry();
        let registry = registry.read().await;
        registry
            .iter()
            .filter(|(_, entry)| {
                matches!(entry.status, AgentStatus::Offline | AgentStatus::Error)
                    && entry.recovery_attempts < health.max_recovery_attempts
            })
            .map(|(id, _)| id.clone())
            .collect()
    };

    for agent_id in candidates {
        match try_restart(router, health, &agent_id).await {
            Ok(()) => info!(agent_id = %agent_id, "agent recovered"),
            Err(err) => {
                let exhausted = {
                    let registry = router.registry();
                    let mut registry = registry.write().await;
                    match registry.get_mut(&agent_id) {
                        Some(entry) => {
                            entry.recovery_attempts += 1;
                            entry.status = AgentStatus::Offline;
                            entry.record_error(err.to_string());
                            entry.recovery_attempts >= health.max_recovery_attempts
                        }
                        None => continue,
                    }
                };
                if exhausted {
                    error!(agent_id = %agent_id, error = %err, "recovery budget exhausted, leaving agent offline");
                } else {
                    warn!(agent_id = %agent_id, error = %err, "agent restart failed");
                }
                router.emit(NetworkEvent::AgentError {
                    agent_id,
                    error: err.to_string(),
                });
            }
        }
    }
}

/// Shutdown + reset, each bounded by the probe timeout. On success the
/// registry entry returns to `Idle` with cleared failure counters.
pub(crate) async fn try_restart(
    router: &Router,
    health: &HealthConfig,
    agent_id: &str,
) -> MeshResult<()> {
    let agent = {
        let registry = router.registry();
        let registry = registry.read().await;
        let entry = registry
            .get(agent_id)
            .ok_or_else(|| MeshError::AgentNotFound(agent_id.to_string()))?;
        if entry.status == AgentStatus::Busy {
            return Err(MeshError::AgentBusy {
                agent_id: agent_id.to_string(),
            });
        }
        Arc::clone(&entry.agent)
    };

    {
        let mut guard = agent.lock().await;
        let shutdown = match timeout(health.probe_timeout(), guard.shutdown()).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout {
                timeout_secs: health.probe_timeout_seconds,
            }),
        };
        if let Err(err) = shutdown {
            // A failed shutdown does not abort the restart; reset decides.
            warn!(agent_id, error = %err, "shutdown during restart failed");
        }
        match timeout(health.probe_timeout(), guard.reset()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AgentError::Timeout {
                    timeout_secs: health.probe_timeout_seconds,
                }
                .into())
            }
        }
    }

    let registry = router.registry();
    let mut registry = registry.write().await;
    if let Some(entry) = registry.get_mut(agent_id) {
        entry.mark_recovered();
    }
    Ok(())
}

/// Route eligible pending tasks in one pass. A task that finds no capacity
/// is set aside for the rest of the pass rather than ending it, so an
/// unroutable high-priority task cannot starve routable work behind it.
/// Every other iteration either finishes a task or pushes it into a backoff
/// window, so this terminates.
async fn drain_pending(router: &Router) {
    let mut skipped: HashSet<String> = HashSet::new();
    loop {
        // Re-promote each iteration so a completed dependency unblocks its
        // dependents within the same pass.
        router.promote_blocked_tasks().await;
        let Some(task_id) = router.next_task_excluding(&skipped).await else {
            break;
        };
        match router.route_task(&task_id).await {
            Ok(RouteOutcome::NoCapacity { task_id }) => {
                skipped.insert(task_id);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "routing attempt failed");
                skipped.insert(task_id);
            }
        }
    }
}

async fn sweep_stale(router: &Router, config: &NetworkConfig) -> usize {
    let retention = chrono::Duration::seconds(config.task_retention_seconds as i64);
    let tasks = router.task_map();
    let mut tasks = tasks.write().await;
    let now = Utc::now();
    let before = tasks.len();
    tasks.retain(|_, task| !(task.is_terminal() && now - task.updated_at >= retention));
    before - tasks.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskStatus;
    use crate::testing::fixtures::{ConfigFixtures, TaskFixtures};
    use crate::testing::mocks::MockAgent;

    fn network() -> Network {
        match Network::new(ConfigFixtures::fast_network()) {
            Ok(network) => network,
            Err(err) => panic!("fixture config invalid: {err}"),
        }
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_construction() {
        let mut config = NetworkConfig::default();
        config.health.check_interval_seconds = 0;
        assert!(matches!(
            Network::new(config),
            Err(MeshError::Config(_))
        ));
    }

    #[tokio::test]
    async fn empty_pool_is_critical() {
        let network = network();
        assert_eq!(network.check_health().await.status, HealthStatus::Critical);
    }

    #[tokio::test]
    async fn healthy_pool_reports_healthy() {
        let network = network();
        network
            .add_agent(Box::new(
                MockAgent::new("a", "a").with_capabilities(vec!["code"]),
            ))
            .await;
        let report = network.check_health().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.agents_available, 1);
    }

    #[tokio::test]
    async fn unavailable_agent_degrades_but_does_not_kill_the_pool() {
        let network = network();
        let flaky = MockAgent::new("a", "a").with_capabilities(vec!["code"]);
        let availability = flaky.availability_handle();
        network.add_agent(Box::new(flaky)).await;
        network
            .add_agent(Box::new(
                MockAgent::new("b", "b").with_capabilities(vec!["code"]),
            ))
            .await;

        availability.store(false, Ordering::SeqCst);
        let report = network.check_health().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.agents_available, 1);
        assert_eq!(report.agents_unhealthy, 1);
    }

    #[tokio::test]
    async fn restart_recovers_an_error_agent() {
        let network = network();
        let agent = MockAgent::new("a", "a").with_capabilities(vec!["code"]);
        let resets = agent.reset_calls_handle();
        let id = network.add_agent(Box::new(agent)).await;

        {
            let registry = network.router().registry();
            let mut registry = registry.write().await;
            registry[&*id].status = AgentStatus::Error;
        }
        network.restart_agent(&id).await.unwrap();
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        let agents = network.agents().await;
        assert_eq!(agents[0].status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn restart_refuses_a_busy_agent() {
        let network = network();
        let id = network
            .add_agent(Box::new(MockAgent::new("a", "a")))
            .await;
        {
            let registry = network.router().registry();
            let mut registry = registry.write().await;
            registry[&*id].status = AgentStatus::Busy;
        }
        assert!(matches!(
            network.restart_agent(&id).await,
            Err(MeshError::AgentBusy { .. })
        ));
    }

    #[tokio::test]
    async fn restart_of_unknown_agent_fails() {
        let network = network();
        assert!(matches!(
            network.restart_agent("ghost").await,
            Err(MeshError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn replace_agent_swaps_and_requeues() {
        let network = network();
        let old = network
            .add_agent(Box::new(
                MockAgent::new("old", "old").with_capabilities(vec!["code"]),
            ))
            .await;
        let task = network
            .submit_task(TaskFixtures::task("code", 1))
            .await
            .unwrap();
        {
            let tasks = network.router().task_map();
            let mut tasks = tasks.write().await;
            let entry = tasks.get_mut(&task.id).unwrap();
            entry.transition_to(TaskStatus::InProgress);
            entry.assigned_agent_id = Some(old.clone());
        }

        let new_id = network
            .replace_agent(
                &old,
                Box::new(MockAgent::new("new", "new").with_capabilities(vec!["code"])),
            )
            .await
            .unwrap();
        assert_eq!(new_id, "new");

        let agents = network.agents().await;
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id, "new");
        let task = network.get_task(&task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.assigned_agent_id, None);
    }

    #[tokio::test]
    async fn stale_sweep_evicts_only_old_terminal_tasks() {
        let network = network();
        let done = network
            .submit_task(TaskFixtures::task("code", 1).with_id("done"))
            .await
            .unwrap();
        network
            .submit_task(TaskFixtures::task("code", 1).with_id("live"))
            .await
            .unwrap();
        {
            let tasks = network.router().task_map();
            let mut tasks = tasks.write().await;
            let entry = tasks.get_mut(&done.id).unwrap();
            entry.transition_to(TaskStatus::InProgress);
            entry.transition_to(TaskStatus::Completed);
            entry.updated_at = Utc::now() - chrono::Duration::seconds(5);
        }

        assert_eq!(network.cleanup_stale_tasks().await, 1);
        // Sweep is idempotent: nothing else qualifies.
        assert_eq!(network.cleanup_stale_tasks().await, 0);
        assert!(network.get_task("done").await.is_none());
        assert!(network.get_task("live").await.is_some());
    }

    #[tokio::test]
    async fn initialize_and_shutdown_are_idempotent() {
        let network = network();
        network.add_agent(Box::new(MockAgent::new("a", "a"))).await;
        network.initialize().await.unwrap();
        network.initialize().await.unwrap();
        assert!(network.is_running());

        network.shutdown().await;
        network.shutdown().await;
        assert!(!network.is_running());

        // Submissions are refused after shutdown.
        let err = network
            .submit_task(TaskFixtures::task("code", 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MeshError::Router(crate::router::RouterError::ShuttingDown)
        ));
    }
}
