//! Health monitor
//!
//! Probes every registered agent on a fixed interval, independent of request
//! traffic, and feeds the outcome into the capability registry. Probe errors
//! only change registry state; they never reach request handling.
//!
//! Transitions:
//! - a failed probe below the failure threshold marks the agent Degraded
//! - `failure_threshold` consecutive failures mark it Unreachable
//! - a single success from Unreachable restores Healthy directly
//! - a successful but slow probe marks it Degraded

use super::pool::AgentPool;
use super::registry::CapabilityRegistry;
use crate::types::HealthStatus;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct HealthMonitorConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub failure_threshold: u32,
    pub degraded_latency: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            failure_threshold: 3,
            degraded_latency: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success { latency: Duration },
    Failure,
}

/// Status after a probe, given the failure streak including this probe.
pub fn next_status(
    current: HealthStatus,
    consecutive_failures: u32,
    outcome: ProbeOutcome,
    config: &HealthMonitorConfig,
) -> HealthStatus {
    match outcome {
        ProbeOutcome::Success { .. } if current == HealthStatus::Unreachable => {
            HealthStatus::Healthy
        }
        ProbeOutcome::Success { latency } if latency > config.degraded_latency => {
            HealthStatus::Degraded
        }
        ProbeOutcome::Success { .. } => HealthStatus::Healthy,
        ProbeOutcome::Failure if consecutive_failures >= config.failure_threshold => {
            HealthStatus::Unreachable
        }
        ProbeOutcome::Failure if current == HealthStatus::Unreachable => HealthStatus::Unreachable,
        ProbeOutcome::Failure => HealthStatus::Degraded,
    }
}

/// Result of probing one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub agent_id: String,
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub consecutive_failures: u32,
    pub error: Option<String>,
}

pub struct HealthMonitor {
    registry: Arc<CapabilityRegistry>,
    pool: Arc<AgentPool>,
    config: HealthMonitorConfig,
    failures: Mutex<HashMap<String, u32>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        pool: Arc<AgentPool>,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            registry,
            pool,
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    /// Current run of failed probes, `None` once the agent answers or leaves
    /// the registry.
    pub fn failure_streak(&self, agent_id: &str) -> Option<u32> {
        self.failures.lock().get(agent_id).copied()
    }

    /// Probe every registered agent concurrently and apply the results.
    pub async fn probe_once(&self) -> Vec<ProbeReport> {
        let descriptors = self.registry.snapshot().all();
        self.failures
            .lock()
            .retain(|agent_id, _| descriptors.iter().any(|d| &d.agent_id == agent_id));

        let probes = descriptors.iter().map(|descriptor| async move {
            let started = Instant::now();
            let outcome = match self.pool.get(&descriptor.agent_id) {
                Some(agent) => {
                    match tokio::time::timeout(self.config.probe_timeout, agent.health_check())
                        .await
                    {
                        Ok(Ok(())) => Ok(started.elapsed()),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!(
                            "probe timed out after {}ms",
                            self.config.probe_timeout.as_millis()
                        )),
                    }
                }
                None => Err("no live instance".to_string()),
            };
            (descriptor, outcome)
        });

        let outcomes = join_all(probes).await;

        outcomes
            .into_iter()
            .map(|(descriptor, outcome)| {
                let agent_id = descriptor.agent_id.clone();
                let (probe, latency, error) = match outcome {
                    Ok(latency) => (ProbeOutcome::Success { latency }, latency, None),
                    Err(e) => (ProbeOutcome::Failure, self.config.probe_timeout, Some(e)),
                };

                let streak = {
                    let mut failures = self.failures.lock();
                    match probe {
                        ProbeOutcome::Success { .. } => {
                            failures.remove(&agent_id);
                            0
                        }
                        ProbeOutcome::Failure => {
                            let streak = failures.entry(agent_id.clone()).or_insert(0);
                            *streak += 1;
                            *streak
                        }
                    }
                };

                let status = next_status(descriptor.health_status, streak, probe, &self.config);
                self.registry.update_health(&agent_id, status);
                self.registry
                    .report_load(&agent_id, self.pool.in_flight(&agent_id));

                if let Some(e) = &error {
                    warn!(%agent_id, failures = streak, %status, error = %e, "health probe failed");
                } else {
                    debug!(%agent_id, latency_ms = latency.as_millis() as u64, %status, "health probe ok");
                }

                ProbeReport {
                    agent_id,
                    status,
                    latency_ms: latency.as_millis() as u64,
                    consecutive_failures: streak,
                    error,
                }
            })
            .collect()
    }

    /// Start the probe loop. It runs until `shutdown` is cancelled.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("health monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        monitor.probe_once().await;
                    }
                }
            }
        })
    }
}
