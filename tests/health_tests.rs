//! Health probing and its effect on routing.

mod common;

use common::mocks::{Behavior, ScriptedAgent};
use common::principal;
use copilot::agents::HealthMonitorConfig;
use copilot::types::{Domain, HealthStatus, ResponseStatus};
use copilot::Copilot;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn monitor_config() -> HealthMonitorConfig {
    HealthMonitorConfig {
        interval: Duration::from_secs(10),
        probe_timeout: Duration::from_secs(1),
        failure_threshold: 3,
        degraded_latency: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_three_failed_probes_exclude_agent_until_recovery() {
    let agent = Arc::new(ScriptedAgent::replying("query-1", Domain::Query, "ok"));
    let copilot = Copilot::builder()
        .health_config(monitor_config())
        .agent(agent.clone())
        .build();

    agent.set_healthy(false);
    copilot.probe_agents().await;
    assert_eq!(
        copilot.registry().get("query-1").unwrap().health_status,
        HealthStatus::Degraded
    );
    assert_eq!(copilot.registry().list(Domain::Query).len(), 1);

    copilot.probe_agents().await;
    let reports = copilot.probe_agents().await;
    assert_eq!(reports[0].consecutive_failures, 3);
    assert_eq!(reports[0].status, HealthStatus::Unreachable);
    assert!(copilot.registry().list(Domain::Query).is_empty());

    let response = copilot
        .handle("show inventory for SKU-42", "conv-1", &principal())
        .await;
    assert_eq!(response.status, ResponseStatus::Failed);
    assert_eq!(agent.calls(), 0);

    agent.set_healthy(true);
    copilot.probe_agents().await;
    assert_eq!(
        copilot.registry().get("query-1").unwrap().health_status,
        HealthStatus::Healthy
    );
    assert_eq!(copilot.registry().list(Domain::Query).len(), 1);

    let response = copilot
        .handle("show inventory for SKU-42", "conv-1", &principal())
        .await;
    assert_eq!(response.status, ResponseStatus::Succeeded);
}

#[tokio::test]
async fn test_healthy_agent_preferred_over_degraded() {
    let flaky = Arc::new(ScriptedAgent::replying("query-a", Domain::Query, "from a"));
    let steady = Arc::new(ScriptedAgent::replying("query-b", Domain::Query, "from b"));
    let copilot = Copilot::builder()
        .health_config(monitor_config())
        .agent(flaky.clone())
        .agent(steady.clone())
        .build();

    flaky.set_healthy(false);
    copilot.probe_agents().await;

    let response = copilot
        .handle("show inventory for SKU-42", "conv-1", &principal())
        .await;
    assert_eq!(response.sections[0].agent_id, "query-b");
    assert_eq!(flaky.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_probe_times_out_as_failure() {
    struct Hanging;

    #[async_trait::async_trait]
    impl copilot::Agent for Hanging {
        fn agent_id(&self) -> &str {
            "hanging"
        }

        fn domains(&self) -> Vec<Domain> {
            vec![Domain::Help]
        }

        async fn execute(
            &self,
            _task: &copilot::agents::AgentTask,
        ) -> copilot::Result<copilot::types::AgentOutput> {
            Ok(copilot::types::AgentOutput::text("never"))
        }

        async fn health_check(&self) -> copilot::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    let copilot = Copilot::builder()
        .health_config(monitor_config())
        .agent(Arc::new(Hanging))
        .build();

    let reports = copilot.probe_agents().await;
    assert_eq!(reports[0].status, HealthStatus::Degraded);
    assert!(reports[0].error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_background_monitor_probes_on_interval() {
    let agent = Arc::new(ScriptedAgent::new(
        "query-1",
        Domain::Query,
        Behavior::Reply("ok".into()),
    ));
    agent.set_healthy(false);
    let copilot = Copilot::builder()
        .health_config(monitor_config())
        .agent(agent.clone())
        .build();

    let shutdown = CancellationToken::new();
    let handle = copilot.start_health_monitor(shutdown.clone());

    // First tick fires immediately, then every 10s.
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(copilot.registry().list(Domain::Query).is_empty());
    assert!(copilot.registry().get("query-1").unwrap().last_probe_at.is_some());

    shutdown.cancel();
    handle.await.unwrap();
}
