//! End-to-end tests across network, router, scheduler, and metrics.

use std::sync::Arc;
use std::time::Duration;
use taskmesh::testing::fixtures::{ConfigFixtures, TaskFixtures};
use taskmesh::testing::mocks::MockAgent;
use taskmesh::{
    HealthStatus, MeshError, Network, RouteOutcome, Scheduler, SchedulerConfig, TaskStatus,
};

fn fast_network() -> Network {
    Network::new(ConfigFixtures::fast_network()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn dependency_chain_completes_in_order() {
    let network = fast_network();
    network
        .add_agent(Box::new(
            MockAgent::new("a", "a").with_capabilities(vec!["code"]),
        ))
        .await;
    network.initialize().await.unwrap();

    for task in TaskFixtures::chain("code", 3) {
        network.submit_task(task).await.unwrap();
    }
    assert_eq!(
        network.get_task("t-1").await.unwrap().status,
        TaskStatus::Blocked
    );

    // Each drained link unblocks the next within the same cycle.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    network.shutdown().await;

    for id in ["t-0", "t-1", "t-2"] {
        let task = network.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed, "task {id}");
    }
    let t0 = network.get_task("t-0").await.unwrap();
    let t1 = network.get_task("t-1").await.unwrap();
    assert!(t0.finished_at.unwrap() <= t1.started_at.unwrap());
}

#[tokio::test]
async fn retry_bound_is_exact_across_restarts() {
    let network = fast_network();
    let agent_id = network
        .add_agent(Box::new(
            MockAgent::new("flaky", "flaky")
                .with_capabilities(vec!["code"])
                .with_failure(),
        ))
        .await;
    let router = network.router();
    let max_retries = network.config().router.max_retries;

    let task = network
        .submit_task(TaskFixtures::task("code", 0))
        .await
        .unwrap();

    for attempt in 1..=max_retries {
        let outcome = router.route_task(&task.id).await.unwrap();
        let expect_retry = attempt < max_retries;
        assert!(
            matches!(outcome, RouteOutcome::Failed { will_retry, .. } if will_retry == expect_retry),
            "attempt {attempt}"
        );
        if expect_retry {
            network.restart_agent(&agent_id).await.unwrap();
        }
    }

    let task = network.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, max_retries);

    // Terminal: no further routing.
    assert!(router.route_task(&task.id).await.is_err());
}

#[tokio::test]
async fn retry_can_land_on_a_different_agent() {
    let network = fast_network();
    network
        .add_agent(Box::new(
            MockAgent::new("flaky", "flaky")
                .with_capabilities(vec!["code"])
                .with_failure(),
        ))
        .await;
    let healthy = MockAgent::new("steady", "steady").with_capabilities(vec!["code"]);
    let processed = healthy.processed_handle();
    network.add_agent(Box::new(healthy)).await;
    let router = network.router();

    let task = network
        .submit_task(TaskFixtures::task("code", 0))
        .await
        .unwrap();

    // Round-robin picks "flaky" first; its failure re-queues the task and the
    // retry goes to "steady".
    let first = router.route_task(&task.id).await.unwrap();
    assert!(matches!(first, RouteOutcome::Failed { ref agent_id, .. } if agent_id == "flaky"));
    let second = router.route_next_task().await.unwrap();
    assert!(matches!(second, RouteOutcome::Completed { ref agent_id, .. } if agent_id == "steady"));

    assert_eq!(processed.lock().unwrap().len(), 1);
    let task = network.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn scheduler_feeds_the_network() {
    let network = Arc::new(fast_network());
    network
        .add_agent(Box::new(
            MockAgent::new("a", "a").with_capabilities(vec!["maintenance"]),
        ))
        .await;
    network.initialize().await.unwrap();

    let scheduler = Scheduler::new(
        Arc::clone(&network),
        SchedulerConfig {
            interval_seconds: 2,
            task_type: "maintenance".to_string(),
            ..SchedulerConfig::default()
        },
    )
    .unwrap();
    scheduler.start().await;

    tokio::time::sleep(Duration::from_millis(5500)).await;
    scheduler.stop().await;
    network.shutdown().await;

    let metrics = network.get_metrics().await;
    assert_eq!(metrics.tasks_by_type.get("maintenance"), Some(&2));
    assert_eq!(metrics.tasks_completed, 2);
}

#[tokio::test]
async fn metrics_reflect_mixed_outcomes() {
    let network = fast_network();
    network
        .add_agent(Box::new(
            MockAgent::new("good", "good").with_capabilities(vec!["code"]),
        ))
        .await;
    network
        .add_agent(Box::new(
            MockAgent::new("bad", "bad")
                .with_capabilities(vec!["doc"])
                .with_failure(),
        ))
        .await;
    let router = network.router();

    let ok = network
        .submit_task(TaskFixtures::task("code", 0))
        .await
        .unwrap();
    let doomed = network
        .submit_task(TaskFixtures::task("doc", 0))
        .await
        .unwrap();
    network
        .submit_task(TaskFixtures::task("doc", 0))
        .await
        .unwrap();

    router.route_task(&ok.id).await.unwrap();
    router.route_task(&doomed.id).await.unwrap();

    let metrics = network.get_metrics().await;
    assert_eq!(metrics.tasks_total, 3);
    assert_eq!(metrics.tasks_completed, 1);
    // The failed dispatch re-queued its task.
    assert_eq!(metrics.tasks_failed, 0);
    assert_eq!(metrics.tasks_pending, 2);
    assert_eq!(metrics.agents_total, 2);
    assert_eq!(metrics.agents_error, 1);
}

#[tokio::test]
async fn one_impaired_agent_degrades_the_pool() {
    let network = fast_network();
    network
        .add_agent(Box::new(
            MockAgent::new("bad", "bad")
                .with_capabilities(vec!["doc"])
                .with_failure(),
        ))
        .await;
    network
        .add_agent(Box::new(
            MockAgent::new("good", "good").with_capabilities(vec!["code"]),
        ))
        .await;
    let router = network.router();

    assert_eq!(network.check_health().await.status, HealthStatus::Healthy);

    let doomed = network
        .submit_task(TaskFixtures::task("doc", 0))
        .await
        .unwrap();
    router.route_task(&doomed.id).await.unwrap();

    // "bad" is now in error state, "good" still serves: degraded, not down.
    let report = network.check_health().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.agents_available, 1);
    assert_eq!(report.agents_unhealthy, 1);

    let ok = network
        .submit_task(TaskFixtures::task("code", 0))
        .await
        .unwrap();
    let outcome = router.route_task(&ok.id).await.unwrap();
    assert!(matches!(outcome, RouteOutcome::Completed { .. }));
}

#[tokio::test]
async fn shutdown_stops_intake_and_winds_down_agents() {
    let network = fast_network();
    let agent = MockAgent::new("a", "a").with_capabilities(vec!["code"]);
    let shutdowns = agent.shutdown_calls_handle();
    network.add_agent(Box::new(agent)).await;
    network.initialize().await.unwrap();
    network.shutdown().await;

    assert_eq!(shutdowns.load(std::sync::atomic::Ordering::SeqCst), 1);
    let err = network
        .submit_task(TaskFixtures::task("code", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::Router(_)));
}
