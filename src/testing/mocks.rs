//! A scriptable in-memory [`Agent`] implementation.

use crate::agents::{Agent, AgentError, AgentHealth};
use crate::tasks::Task;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock agent whose behavior is steered through shared atomic handles, so a
/// test keeps control after the agent is boxed into the registry.
#[derive(Debug, Clone)]
pub struct MockAgent {
    id: String,
    name: String,
    capabilities: Vec<String>,
    delay: Option<Duration>,
    available: Arc<AtomicBool>,
    should_fail: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
    fail_reset: Arc<AtomicBool>,
    processed: Arc<Mutex<Vec<Task>>>,
    reset_calls: Arc<AtomicUsize>,
    shutdown_calls: Arc<AtomicUsize>,
}

impl MockAgent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: Vec::new(),
            delay: None,
            available: Arc::new(AtomicBool::new(true)),
            should_fail: Arc::new(AtomicBool::new(false)),
            healthy: Arc::new(AtomicBool::new(true)),
            fail_reset: Arc::new(AtomicBool::new(false)),
            processed: Arc::new(Mutex::new(Vec::new())),
            reset_calls: Arc::new(AtomicUsize::new(0)),
            shutdown_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Every `process_task` call fails until the handle is flipped back.
    pub fn with_failure(self) -> Self {
        self.should_fail.store(true, Ordering::SeqCst);
        self
    }

    /// Sleep inside `process_task` to simulate slow work.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report unhealthy from `get_status` until the handle is flipped back.
    pub fn with_unhealthy_status(self) -> Self {
        self.healthy.store(false, Ordering::SeqCst);
        self
    }

    /// Make `reset` fail, modelling an unrecoverable agent.
    pub fn with_failing_reset(self) -> Self {
        self.fail_reset.store(true, Ordering::SeqCst);
        self
    }

    pub fn availability_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.available)
    }

    pub fn failure_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.should_fail)
    }

    pub fn health_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.healthy)
    }

    /// Tasks this agent has processed (successfully or not), in order.
    pub fn processed_handle(&self) -> Arc<Mutex<Vec<Task>>> {
        Arc::clone(&self.processed)
    }

    pub fn reset_calls_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reset_calls)
    }

    pub fn shutdown_calls_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.shutdown_calls)
    }
}

#[async_trait::async_trait]
impl Agent for MockAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn process_task(&mut self, task: Task) -> Result<serde_json::Value, AgentError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let task_id = task.id.clone();
        if let Ok(mut processed) = self.processed.lock() {
            processed.push(task);
        }
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(AgentError::ExecutionFailed(format!(
                "mock failure processing {task_id}"
            )));
        }
        Ok(json!({ "processed_by": self.id, "task_id": task_id }))
    }

    async fn get_status(&self) -> AgentHealth {
        if self.healthy.load(Ordering::SeqCst) {
            AgentHealth::healthy()
        } else {
            AgentHealth::unhealthy("mock agent reporting unhealthy")
        }
    }

    async fn reset(&mut self) -> Result<(), AgentError> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reset.load(Ordering::SeqCst) {
            return Err(AgentError::ResetFailed("mock reset failure".to_string()));
        }
        self.healthy.store(true, Ordering::SeqCst);
        self.available.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), AgentError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.available.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_agent_records_processed_tasks() {
        let mut agent = MockAgent::new("m1", "mock").with_capabilities(vec!["code"]);
        let processed = agent.processed_handle();
        let task = Task::new("code", "do something");
        let result = agent.process_task(task.clone()).await.unwrap();
        assert_eq!(result["task_id"], serde_json::json!(task.id));
        assert_eq!(processed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_flag_controls_outcome() {
        let mut agent = MockAgent::new("m1", "mock").with_failure();
        let failure = agent.failure_handle();
        assert!(agent.process_task(Task::new("code", "x")).await.is_err());
        failure.store(false, Ordering::SeqCst);
        assert!(agent.process_task(Task::new("code", "x")).await.is_ok());
    }

    #[tokio::test]
    async fn reset_restores_health_and_availability() {
        let mut agent = MockAgent::new("m1", "mock").with_unhealthy_status();
        agent.shutdown().await.unwrap();
        assert!(!agent.is_available());
        agent.reset().await.unwrap();
        assert!(agent.is_available());
        assert!(agent.get_status().await.healthy);
        assert_eq!(agent.reset_calls_handle().load(Ordering::SeqCst), 1);
        assert_eq!(agent.shutdown_calls_handle().load(Ordering::SeqCst), 1);
    }
}
