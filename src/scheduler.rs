//! Periodic task producer.
//!
//! The scheduler injects a synthetic task of a configured type on a fixed
//! interval, typically to drive maintenance work through otherwise idle
//! agents. It is an ordinary producer: everything it submits flows through
//! the same router path as external tasks.

use crate::config::SchedulerConfig;
use crate::error::MeshResult;
use crate::network::Network;
use crate::tasks::Task;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct TickerHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Emits one task per interval into the network.
pub struct Scheduler {
    config: SchedulerConfig,
    network: Arc<Network>,
    ticker: Mutex<Option<TickerHandle>>,
}

impl Scheduler {
    pub fn new(network: Arc<Network>, config: SchedulerConfig) -> MeshResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            network,
            ticker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        self.ticker.lock().await.is_some()
    }

    /// Start the tick loop. Idempotent; the first task is injected one full
    /// interval after start, not immediately.
    pub async fn start(&self) {
        let mut ticker = self.ticker.lock().await;
        if ticker.is_some() {
            warn!("scheduler already running");
            return;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(
            Arc::clone(&self.network),
            self.config.clone(),
            token.clone(),
        ));
        *ticker = Some(TickerHandle { token, handle });
        info!(
            interval_s = self.config.interval_seconds,
            task_type = %self.config.task_type,
            "scheduler started"
        );
    }

    /// Stop the tick loop. Idempotent.
    pub async fn stop(&self) {
        let Some(ticker) = self.ticker.lock().await.take() else {
            return;
        };
        ticker.token.cancel();
        if let Err(err) = ticker.handle.await {
            warn!(error = %err, "scheduler task did not stop cleanly");
        }
        info!("scheduler stopped");
    }
}

async fn run(network: Arc<Network>, config: SchedulerConfig, token: CancellationToken) {
    let mut ticker = interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // zeroth tick fires immediately

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let task = Task::new(&config.task_type, &config.description)
                    .with_priority(config.priority);
                match network.submit_task(task).await {
                    Ok(task) => debug!(task_id = %task.id, task_type = %task.task_type, "scheduled task injected"),
                    Err(err) => warn!(error = %err, "scheduled task rejected"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::ConfigFixtures;
    use std::time::Duration;

    fn scheduler(interval_seconds: u64) -> Scheduler {
        let network = match Network::new(ConfigFixtures::fast_network()) {
            Ok(network) => Arc::new(network),
            Err(err) => panic!("fixture config invalid: {err}"),
        };
        let config = SchedulerConfig {
            interval_seconds,
            task_type: "maintenance".to_string(),
            ..SchedulerConfig::default()
        };
        match Scheduler::new(network, config) {
            Ok(scheduler) => scheduler,
            Err(err) => panic!("scheduler config invalid: {err}"),
        }
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let scheduler = scheduler(3600);
        scheduler.start().await;
        scheduler.start().await;
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn injects_one_task_per_interval() {
        let scheduler = scheduler(1);
        let network = Arc::clone(&scheduler.network);
        scheduler.start().await;

        tokio::time::sleep(Duration::from_millis(3500)).await;
        scheduler.stop().await;

        let tasks = network.router().tasks_snapshot().await;
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.task_type == "maintenance"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_injection_before_the_first_interval() {
        let scheduler = scheduler(10);
        let network = Arc::clone(&scheduler.network);
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        scheduler.stop().await;
        assert!(network.router().tasks_snapshot().await.is_empty());
    }

    #[test]
    fn rejects_invalid_config() {
        let network = match Network::new(ConfigFixtures::fast_network()) {
            Ok(network) => Arc::new(network),
            Err(err) => panic!("fixture config invalid: {err}"),
        };
        let config = SchedulerConfig {
            interval_seconds: 0,
            ..SchedulerConfig::default()
        };
        assert!(Scheduler::new(network, config).is_err());
    }
}
