//! Step dispatcher
//!
//! Runs an [`ExecutionPlan`] to completion. Every step whose dependencies are
//! terminal is started concurrently; each step has its own deadline and the
//! whole request has a parent deadline and an advisory cancellation token.
//! Exactly one terminal [`AgentResult`] is produced per step, whatever
//! happens to the agent.

use super::plan::{ExecutionPlan, PlanStep, StepTarget};
use crate::agents::action::ActionRequest;
use crate::agents::pool::AgentPool;
use crate::agents::{AgentTask, UpstreamOutcome, UpstreamOutput};
use crate::auth::{AuthDecision, Authorizer};
use crate::types::{
    AgentResult, Principal, StepError, StepErrorKind, StepStatus, Turn, Utterance,
};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default per-step deadline.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Request-scoped inputs shared by every step.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub request_id: Uuid,
    pub utterance: Utterance,
    pub principal: Principal,
    pub history: Vec<Turn>,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Indexed by step id.
    pub results: Vec<AgentResult>,
    pub deadline_exceeded: bool,
    pub cancelled: bool,
}

pub struct StepDispatcher {
    pool: Arc<AgentPool>,
    authorizer: Arc<dyn Authorizer>,
    step_timeout: Duration,
}

enum Interrupt {
    Deadline,
    Cancelled,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Gate for action-class steps. An unclear request never reaches the
/// authorizer or the agent.
async fn authorize_step(
    authorizer: &dyn Authorizer,
    task: &AgentTask,
    agent_id: &str,
) -> Result<(), StepError> {
    let request = ActionRequest::from_slots(task.domain, &task.slots).map_err(|e| {
        debug!(step_id = task.step_id, %agent_id, error = %e, "action needs clarification");
        StepError::from(e)
    })?;
    match authorizer
        .authorize(&task.principal, &request.action, &request.resource())
        .await
    {
        Ok(AuthDecision::Allow) => Ok(()),
        Ok(AuthDecision::Deny(reason)) => {
            warn!(step_id = task.step_id, %agent_id, %reason, "step denied by authorization");
            Err(StepError::new(StepErrorKind::AuthorizationDenied, reason))
        }
        Err(e) => Err(StepError::new(StepErrorKind::AuthorizationDenied, e.to_string())),
    }
}

impl StepDispatcher {
    pub fn new(pool: Arc<AgentPool>, authorizer: Arc<dyn Authorizer>, step_timeout: Duration) -> Self {
        Self {
            pool,
            authorizer,
            step_timeout,
        }
    }

    /// Run every step of `plan` to a terminal result.
    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        ctx: &DispatchContext,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let n = plan.len();
        let mut results: Vec<Option<AgentResult>> = vec![None; n];
        let mut started: HashMap<usize, Instant> = HashMap::new();
        let mut tasks: JoinSet<AgentResult> = JoinSet::new();

        for step in plan.steps() {
            if let StepTarget::Unroutable { reason } = &step.target {
                results[step.step_id] = Some(AgentResult::failure(
                    step.step_id,
                    step.domain,
                    None,
                    StepError::new(StepErrorKind::Planning, reason.clone()),
                    0,
                ));
            }
        }

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let interrupt = loop {
            self.advance(plan, ctx, &mut results, &mut started, &mut tasks);

            if tasks.is_empty() {
                break None;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Some(Interrupt::Cancelled),
                _ = &mut sleep => break Some(Interrupt::Deadline),
                joined = tasks.join_next() => match joined {
                    Some(Ok(result)) => {
                        debug!(
                            request_id = %ctx.request_id,
                            step_id = result.step_id,
                            status = ?result.status,
                            latency_ms = result.latency_ms,
                            "step finished"
                        );
                        let step_id = result.step_id;
                        started.remove(&step_id);
                        results[step_id] = Some(result);
                    }
                    Some(Err(e)) => warn!(request_id = %ctx.request_id, error = %e, "step task failed to join"),
                    None => break None,
                },
            }
        };

        let (deadline_exceeded, cancelled) = match interrupt {
            Some(Interrupt::Deadline) => (true, false),
            Some(Interrupt::Cancelled) => (false, true),
            None => (false, false),
        };
        if interrupt.is_some() {
            tasks.abort_all();
            info!(
                request_id = %ctx.request_id,
                in_flight = started.len(),
                deadline_exceeded,
                cancelled,
                "dispatch interrupted, forcing synthesis"
            );
        }

        let results = plan
            .steps()
            .iter()
            .map(|step| {
                if let Some(result) = results[step.step_id].take() {
                    return result;
                }
                let agent_id = step.agent_id().map(str::to_string);
                match started.get(&step.step_id) {
                    Some(since) if cancelled => AgentResult::failure(
                        step.step_id,
                        step.domain,
                        agent_id,
                        StepError::new(StepErrorKind::Cancelled, "cancelled"),
                        elapsed_ms(*since),
                    ),
                    Some(since) if deadline_exceeded => {
                        AgentResult::timeout(step.step_id, step.domain, agent_id, elapsed_ms(*since))
                    }
                    Some(since) => AgentResult::failure(
                        step.step_id,
                        step.domain,
                        agent_id,
                        StepError::new(StepErrorKind::AgentExecution, "step task was lost"),
                        elapsed_ms(*since),
                    ),
                    None => AgentResult::skipped(step.step_id, step.domain, agent_id, None),
                }
            })
            .collect();

        DispatchOutcome {
            results,
            deadline_exceeded,
            cancelled,
        }
    }

    /// Resolve blocked steps and start every step whose dependencies are terminal.
    fn advance(
        &self,
        plan: &ExecutionPlan,
        ctx: &DispatchContext,
        results: &mut [Option<AgentResult>],
        started: &mut HashMap<usize, Instant>,
        tasks: &mut JoinSet<AgentResult>,
    ) {
        for step in plan.steps() {
            if results[step.step_id].is_some() || started.contains_key(&step.step_id) {
                continue;
            }

            let blocker = step.depends_on.iter().copied().find(|dep| {
                matches!(
                    results[*dep].as_ref().map(|r| r.status),
                    Some(StepStatus::Failure | StepStatus::Skipped)
                )
            });
            if let Some(blocker) = blocker {
                debug!(request_id = %ctx.request_id, step_id = step.step_id, blocked_by = blocker, "step skipped");
                results[step.step_id] = Some(AgentResult::skipped(
                    step.step_id,
                    step.domain,
                    step.agent_id().map(str::to_string),
                    Some(blocker),
                ));
                continue;
            }

            if step.depends_on.iter().any(|dep| results[*dep].is_none()) {
                continue;
            }

            let upstream = step
                .depends_on
                .iter()
                .filter_map(|dep| results[*dep].as_ref())
                .map(|r| UpstreamOutput {
                    step_id: r.step_id,
                    domain: r.domain,
                    agent_id: r.agent_id.clone(),
                    outcome: match (&r.status, &r.payload) {
                        (StepStatus::Success, Some(payload)) => {
                            UpstreamOutcome::Available(payload.clone())
                        }
                        _ => UpstreamOutcome::Absent {
                            reason: format!("step {} ({}) did not finish in time", r.step_id, r.domain),
                        },
                    },
                })
                .collect();

            started.insert(step.step_id, Instant::now());
            self.spawn_step(step, ctx, upstream, tasks);
        }
    }

    fn spawn_step(
        &self,
        step: &PlanStep,
        ctx: &DispatchContext,
        upstream: Vec<UpstreamOutput>,
        tasks: &mut JoinSet<AgentResult>,
    ) {
        let step_id = step.step_id;
        let domain = step.domain;
        let agent_id = step.agent_id().unwrap_or_default().to_string();
        let task = AgentTask {
            request_id: ctx.request_id,
            step_id,
            domain,
            utterance: ctx.utterance.clone(),
            principal: ctx.principal.clone(),
            slots: step.input_slots.clone(),
            upstream,
            history: ctx.history.clone(),
        };
        let pool = Arc::clone(&self.pool);
        let authorizer = Arc::clone(&self.authorizer);
        let step_timeout = self.step_timeout;

        info!(request_id = %ctx.request_id, step_id, %domain, %agent_id, "dispatching step");

        let run = async move {
            let begun = Instant::now();
            let attempt = async {
                if domain.is_action_class() {
                    if let Err(denied) = authorize_step(authorizer.as_ref(), &task, &agent_id).await {
                        return Err(denied);
                    }
                }
                let Some(lease) = pool.acquire(&agent_id) else {
                    return Err(StepError::new(
                        StepErrorKind::AgentExecution,
                        format!("agent '{}' is no longer available", agent_id),
                    ));
                };
                lease.execute(&task).await.map_err(StepError::from)
            };

            let executed = AssertUnwindSafe(tokio::time::timeout(step_timeout, attempt))
                .catch_unwind()
                .await;

            match executed {
                Ok(Ok(Ok(output))) => {
                    AgentResult::success(step_id, domain, agent_id.clone(), output, elapsed_ms(begun))
                }
                Ok(Ok(Err(error))) => AgentResult::failure(
                    step_id,
                    domain,
                    Some(agent_id.clone()),
                    error,
                    elapsed_ms(begun),
                ),
                Ok(Err(_)) => {
                    warn!(step_id, %agent_id, timeout_ms = step_timeout.as_millis() as u64, "step timed out");
                    AgentResult::timeout(step_id, domain, Some(agent_id.clone()), elapsed_ms(begun))
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(step_id, %agent_id, %message, "agent panicked");
                    AgentResult::failure(
                        step_id,
                        domain,
                        Some(agent_id.clone()),
                        StepError::new(
                            StepErrorKind::AgentExecution,
                            format!("agent crashed: {}", message),
                        ),
                        elapsed_ms(begun),
                    )
                }
            }
        };

        tasks.spawn(run);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::registry::RegistrySnapshot;
    use crate::agents::Agent;
    use crate::auth::{AllowAll, AuthDecision};
    use crate::types::{AgentDescriptor, AgentOutput, AppError, Domain, Intent, Result, Slots};
    use crate::workflows::plan::RoutingEngine;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Ok,
        Fail,
        Hang,
        Panic,
    }

    struct Scripted {
        id: &'static str,
        domain: Domain,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl Agent for Scripted {
        fn agent_id(&self) -> &str {
            self.id
        }

        fn domains(&self) -> Vec<Domain> {
            vec![self.domain]
        }

        async fn execute(&self, task: &AgentTask) -> Result<AgentOutput> {
            match self.behaviour {
                Behaviour::Ok => Ok(AgentOutput::text(format!(
                    "{} saw {} upstream",
                    self.id,
                    task.upstream.len()
                ))),
                Behaviour::Fail => Err(AppError::AgentExecution("boom".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(AgentOutput::text("late"))
                }
                Behaviour::Panic => panic!("scripted crash"),
            }
        }
    }

    fn setup(agents: Vec<Scripted>) -> (StepDispatcher, RegistrySnapshot) {
        let pool = Arc::new(AgentPool::new());
        let mut descriptors: Vec<AgentDescriptor> = Vec::new();
        for agent in agents {
            descriptors.push(agent.descriptor());
            pool.insert(Arc::new(agent));
        }
        (
            StepDispatcher::new(pool, Arc::new(AllowAll), Duration::from_secs(30)),
            RegistrySnapshot::from_descriptors(descriptors),
        )
    }

    fn ctx() -> DispatchContext {
        let principal = Principal::new("u", "o");
        DispatchContext {
            request_id: Uuid::new_v4(),
            utterance: Utterance::new("test", "c", &principal),
            principal,
            history: Vec::new(),
        }
    }

    fn plan(intents: &[Intent], snapshot: &RegistrySnapshot) -> ExecutionPlan {
        RoutingEngine::default().plan(intents, snapshot).unwrap()
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn update_employee() -> Slots {
        Slots::from([
            ("action".to_string(), "update".to_string()),
            ("entity".to_string(), "employee".to_string()),
        ])
    }

    /// Counts calls; optionally never answers.
    struct CountingAuthorizer {
        calls: AtomicUsize,
        hang: bool,
    }

    #[async_trait]
    impl Authorizer for CountingAuthorizer {
        async fn authorize(&self, _: &Principal, _: &str, _: &str) -> Result<AuthDecision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(AuthDecision::Allow)
        }
    }

    fn action_dispatcher(authorizer: Arc<CountingAuthorizer>) -> (StepDispatcher, RegistrySnapshot) {
        let pool = Arc::new(AgentPool::new());
        let agent = Scripted { id: "action-1", domain: Domain::Action, behaviour: Behaviour::Ok };
        let snapshot = RegistrySnapshot::from_descriptors([agent.descriptor()]);
        pool.insert(Arc::new(agent));
        (
            StepDispatcher::new(pool, authorizer, Duration::from_secs(30)),
            snapshot,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dependency_skips_dependent_but_not_sibling() {
        let (dispatcher, snapshot) = setup(vec![
            Scripted { id: "action-1", domain: Domain::Action, behaviour: Behaviour::Fail },
            Scripted { id: "compliance-1", domain: Domain::Compliance, behaviour: Behaviour::Ok },
            Scripted { id: "help-1", domain: Domain::Help, behaviour: Behaviour::Ok },
        ]);
        let plan = plan(
            &[
                Intent::new(Domain::Action, 0.6).with_slots(update_employee()),
                Intent::new(Domain::Compliance, 0.55),
                Intent::new(Domain::Help, 0.5),
            ],
            &snapshot,
        );

        let outcome = dispatcher.run(&plan, &ctx(), far(), &CancellationToken::new()).await;

        let by_domain = |d: Domain| outcome.results.iter().find(|r| r.domain == d).unwrap();
        assert_eq!(by_domain(Domain::Action).status, StepStatus::Failure);
        assert_eq!(
            by_domain(Domain::Action).error.as_ref().unwrap().kind,
            StepErrorKind::AgentExecution
        );
        let compliance = by_domain(Domain::Compliance);
        assert_eq!(compliance.status, StepStatus::Skipped);
        assert_eq!(compliance.blocked_by, Some(by_domain(Domain::Action).step_id));
        assert_eq!(by_domain(Domain::Help).status, StepStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_passes_absence_marker_downstream() {
        let (dispatcher, snapshot) = setup(vec![
            Scripted { id: "query-1", domain: Domain::Query, behaviour: Behaviour::Hang },
            Scripted { id: "analytics-1", domain: Domain::Analytics, behaviour: Behaviour::Ok },
        ]);
        let plan = plan(
            &[Intent::new(Domain::Query, 0.6), Intent::new(Domain::Analytics, 0.55)],
            &snapshot,
        );

        let outcome = dispatcher.run(&plan, &ctx(), far(), &CancellationToken::new()).await;

        assert_eq!(outcome.results[0].status, StepStatus::Timeout);
        assert_eq!(outcome.results[1].status, StepStatus::Success);
        assert_eq!(
            outcome.results[1].payload.as_ref().unwrap().content,
            "analytics-1 saw 1 upstream"
        );
        assert!(!outcome.deadline_exceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_becomes_failure() {
        let (dispatcher, snapshot) = setup(vec![Scripted {
            id: "query-1",
            domain: Domain::Query,
            behaviour: Behaviour::Panic,
        }]);
        let plan = plan(&[Intent::new(Domain::Query, 0.9)], &snapshot);

        let outcome = dispatcher.run(&plan, &ctx(), far(), &CancellationToken::new()).await;

        let result = &outcome.results[0];
        assert_eq!(result.status, StepStatus::Failure);
        assert!(result.error.as_ref().unwrap().message.contains("scripted crash"));
        assert_eq!(dispatcher.pool.in_flight("query-1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_deadline_forces_terminal_results() {
        let pool = Arc::new(AgentPool::new());
        let hang = Scripted { id: "query-1", domain: Domain::Query, behaviour: Behaviour::Hang };
        let snapshot = RegistrySnapshot::from_descriptors([
            hang.descriptor(),
            AgentDescriptor::new("analytics-1", vec![Domain::Analytics]),
        ]);
        pool.insert(Arc::new(hang));
        pool.insert(Arc::new(Scripted {
            id: "analytics-1",
            domain: Domain::Analytics,
            behaviour: Behaviour::Ok,
        }));
        let dispatcher = StepDispatcher::new(pool, Arc::new(AllowAll), Duration::from_secs(30));
        let plan = plan(
            &[Intent::new(Domain::Query, 0.6), Intent::new(Domain::Analytics, 0.55)],
            &snapshot,
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = dispatcher.run(&plan, &ctx(), deadline, &CancellationToken::new()).await;

        assert!(outcome.deadline_exceeded);
        assert_eq!(outcome.results[0].status, StepStatus::Timeout);
        assert_eq!(outcome.results[1].status, StepStatus::Skipped);
        assert_eq!(outcome.results[1].blocked_by, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_marks_in_flight_cancelled() {
        let (dispatcher, snapshot) = setup(vec![Scripted {
            id: "query-1",
            domain: Domain::Query,
            behaviour: Behaviour::Hang,
        }]);
        let plan = plan(&[Intent::new(Domain::Query, 0.9)], &snapshot);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let outcome = dispatcher.run(&plan, &ctx(), far(), &token).await;

        assert!(outcome.cancelled);
        let error = outcome.results[0].error.as_ref().unwrap();
        assert_eq!(error.kind, StepErrorKind::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unroutable_step_fails_without_dispatch() {
        let (dispatcher, snapshot) = setup(vec![]);
        let plan = plan(&[Intent::new(Domain::Scheduler, 0.9)], &snapshot);

        let outcome = dispatcher.run(&plan, &ctx(), far(), &CancellationToken::new()).await;

        let error = outcome.results[0].error.as_ref().unwrap();
        assert_eq!(error.kind, StepErrorKind::Planning);
        assert_eq!(outcome.results[0].agent_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclear_action_asks_for_clarification_before_authorizing() {
        let authorizer = Arc::new(CountingAuthorizer { calls: AtomicUsize::new(0), hang: false });
        let (dispatcher, snapshot) = action_dispatcher(Arc::clone(&authorizer));
        let unclear = Slots::from([("record_id".to_string(), "7".to_string())]);
        let plan = plan(&[Intent::new(Domain::Action, 0.9).with_slots(unclear)], &snapshot);

        let outcome = dispatcher.run(&plan, &ctx(), far(), &CancellationToken::new()).await;

        let result = &outcome.results[0];
        assert_eq!(result.status, StepStatus::Failure);
        assert_eq!(result.error.as_ref().unwrap().kind, StepErrorKind::Clarification);
        assert_eq!(authorizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_authorizer_is_bounded_by_step_timeout() {
        let authorizer = Arc::new(CountingAuthorizer { calls: AtomicUsize::new(0), hang: true });
        let (dispatcher, snapshot) = action_dispatcher(Arc::clone(&authorizer));
        let plan = plan(&[Intent::new(Domain::Action, 0.9).with_slots(update_employee())], &snapshot);
        let deadline = Instant::now() + Duration::from_secs(600);

        let outcome = dispatcher.run(&plan, &ctx(), deadline, &CancellationToken::new()).await;

        assert!(!outcome.deadline_exceeded);
        assert_eq!(outcome.results[0].status, StepStatus::Timeout);
        assert_eq!(authorizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.pool.in_flight("action-1"), 0);
    }
}
