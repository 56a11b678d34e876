//! Master orchestrator.
//!
//! [`Copilot`] owns one instance of every collaborator (registry, agent pool,
//! health monitor, classifier, routing engine, dispatcher, context manager)
//! and drives each request through
//! Received → Planning → Dispatching → Synthesizing → Completed, or to
//! Failed when planning yields no routable step. It is constructed
//! explicitly, so tests can run fully isolated instances side by side.

use super::health::{HealthMonitor, HealthMonitorConfig, ProbeReport};
use super::pool::AgentPool;
use super::registry::CapabilityRegistry;
use super::router::{IntentClassifier, KeywordClassifier, ModelIntentClassifier};
use super::{
    ActionAgent, Agent, AnalyticsAgent, ComplianceAgent, HelpAgent, QueryAgent, SchedulerAgent,
};
use crate::auth::{AllowAll, Authorizer, PolicyAuthorizer};
use crate::connectors::{ErpConnector, HttpErpConnector, RetryingConnector};
use crate::llm::{ModelProvider, Provider, RetryingProvider};
use crate::memory::ContextManager;
use crate::rag::{InMemoryKnowledgeBase, KnowledgeRetrieval};
use crate::types::{
    AgentResult, AppError, Diagnostics, Domain, LifecycleState, Principal, Response,
    ResponseStatus, Result, StepError, StepErrorKind, StepStatus, Turn, Utterance,
};
use crate::utils::toml_config::{ClassifierKind, CopilotConfig, ProviderConfig};
use crate::workflows::{
    synthesize, DispatchContext, ExecutionPlan, RoutingEngine, StepDispatcher, StepTarget,
    DEFAULT_STEP_TIMEOUT,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Default deadline for a whole request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Average latency above which the stats suggest caching.
const SLOW_AVERAGE_MS: f64 = 2000.0;

/// Success rate (percent) below which the stats suggest reviewing failures.
const HEALTHY_SUCCESS_RATE: f64 = 95.0;

/// Receives completed turns for long-term persistence.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn record(&self, conversation_id: &str, turns: &[Turn]) -> Result<()>;
}

/// Aggregate request statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrchestratorStats {
    pub total_requests: u64,
    pub succeeded: u64,
    pub partial: u64,
    pub failed: u64,
    /// Percentage of requests that fully succeeded.
    pub success_rate: f64,
    pub average_latency_ms: f64,
    /// Dispatched steps per agent.
    pub agent_usage: BTreeMap<String, u64>,
    pub recommendations: Vec<String>,
}

#[derive(Default)]
struct StatsState {
    total: u64,
    succeeded: u64,
    partial: u64,
    failed: u64,
    total_latency_ms: u64,
    usage: BTreeMap<String, u64>,
}

impl StatsState {
    fn record(&mut self, status: ResponseStatus, elapsed_ms: u64, results: &[AgentResult]) {
        self.total += 1;
        self.total_latency_ms += elapsed_ms;
        match status {
            ResponseStatus::Succeeded => self.succeeded += 1,
            ResponseStatus::PartialSuccess => self.partial += 1,
            ResponseStatus::Failed => self.failed += 1,
        }
        for result in results {
            let dispatched = result.status != StepStatus::Skipped
                && result.error.as_ref().map(|e| e.kind) != Some(StepErrorKind::Planning);
            if let (true, Some(agent_id)) = (dispatched, &result.agent_id) {
                *self.usage.entry(agent_id.clone()).or_insert(0) += 1;
            }
        }
    }

    fn snapshot(&self) -> OrchestratorStats {
        let success_rate = if self.total == 0 {
            100.0
        } else {
            self.succeeded as f64 / self.total as f64 * 100.0
        };
        let average_latency_ms = if self.total == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.total as f64
        };

        let mut recommendations = Vec::new();
        if let Some((agent, _)) = self
            .usage
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        {
            recommendations.push(format!(
                "Agent '{}' handles the most steps; consider running more instances of it",
                agent
            ));
        }
        if average_latency_ms > SLOW_AVERAGE_MS {
            recommendations.push(
                "Average response time is high; consider caching frequently requested data"
                    .to_string(),
            );
        }
        if self.total > 0 && success_rate < HEALTHY_SUCCESS_RATE {
            recommendations
                .push("Review error logs to identify common failure patterns".to_string());
        }

        OrchestratorStats {
            total_requests: self.total,
            succeeded: self.succeeded,
            partial: self.partial,
            failed: self.failed,
            success_rate,
            average_latency_ms,
            agent_usage: self.usage.clone(),
            recommendations,
        }
    }
}

pub struct Copilot {
    registry: Arc<CapabilityRegistry>,
    pool: Arc<AgentPool>,
    health: Arc<HealthMonitor>,
    classifier: Arc<dyn IntentClassifier>,
    routing: RoutingEngine,
    dispatcher: StepDispatcher,
    context: Arc<ContextManager>,
    transcripts: Option<Arc<dyn TranscriptSink>>,
    request_timeout: Duration,
    slot_ttl: Option<Duration>,
    stats: Mutex<StatsState>,
}

impl Copilot {
    pub fn builder() -> CopilotBuilder {
        CopilotBuilder::new()
    }

    /// Wire a copilot from configuration: providers, connectors, agents,
    /// classifier, routing rules, authorization and knowledge.
    ///
    /// # Errors
    ///
    /// Fails when a provider or connector cannot be constructed or a
    /// knowledge file cannot be read.
    pub async fn from_config(config: &CopilotConfig) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();
        for (name, provider) in &config.providers {
            let client = match provider {
                ProviderConfig::Ollama {
                    base_url,
                    default_model,
                } => {
                    Provider::Ollama {
                        base_url: base_url.clone(),
                        model: default_model.clone(),
                    }
                    .create_client()
                    .await?
                }
            };
            let client: Arc<dyn ModelProvider> =
                Arc::new(RetryingProvider::new(client, config.retry.clone()));
            providers.insert(name.clone(), client);
        }

        let mut connectors: HashMap<String, Arc<dyn ErpConnector>> = HashMap::new();
        for (name, connector) in &config.connectors {
            let api_key = connector
                .api_key_env
                .as_deref()
                .and_then(|env| config.resolve_env(env));
            let http = HttpErpConnector::new(
                name.clone(),
                connector.base_url.clone(),
                api_key,
                Duration::from_secs(connector.timeout_secs),
            )?;
            connectors.insert(
                name.clone(),
                Arc::new(RetryingConnector::new(Arc::new(http), config.retry.clone())),
            );
        }

        let documents = config
            .knowledge_documents()
            .map_err(|e| AppError::Configuration(e.to_string()))?;
        let knowledge: Arc<dyn KnowledgeRetrieval> =
            Arc::new(InMemoryKnowledgeBase::with_documents(documents));

        let lookup_provider = |agent_id: &str, name: Option<&str>| -> Result<Arc<dyn ModelProvider>> {
            name.and_then(|n| providers.get(n))
                .cloned()
                .ok_or_else(|| AppError::Configuration(format!("agent '{}' has no provider", agent_id)))
        };
        let lookup_connector = |agent_id: &str, name: Option<&str>| -> Result<Arc<dyn ErpConnector>> {
            name.and_then(|n| connectors.get(n))
                .cloned()
                .ok_or_else(|| AppError::Configuration(format!("agent '{}' has no connector", agent_id)))
        };

        let mut builder = CopilotBuilder::new()
            .step_timeout(config.orchestrator.step_timeout())
            .request_timeout(config.orchestrator.request_timeout())
            .health_config(config.health.monitor_config())
            .context_manager(
                ContextManager::new(config.context.max_turns, None)
                    .with_idle_ttl(config.context.idle_ttl()),
            )
            .slot_ttl(config.context.slot_ttl())
            .routing_engine(RoutingEngine::new(
                config.routing.dominance_margin,
                config.routing.dependencies.clone(),
            )?)
            .authorizer(Arc::new(PolicyAuthorizer::new(
                config.authorization.rules.clone(),
                config.authorization.default_decision,
            )));

        for (agent_id, agent) in config.enabled_agents() {
            let model = config.agent_model(agent).unwrap_or_default();
            let instance: Arc<dyn Agent> = match agent.domain {
                Domain::Query => Arc::new(
                    QueryAgent::new(
                        agent_id.clone(),
                        Arc::clone(&knowledge),
                        lookup_provider(agent_id, agent.provider.as_deref())?,
                        model,
                    )
                    .with_max_results(config.knowledge.max_results),
                ),
                Domain::Help => Arc::new(HelpAgent::new(
                    agent_id.clone(),
                    Arc::clone(&knowledge),
                    lookup_provider(agent_id, agent.provider.as_deref())?,
                    model,
                )),
                Domain::Analytics => Arc::new(AnalyticsAgent::new(
                    agent_id.clone(),
                    lookup_provider(agent_id, agent.provider.as_deref())?,
                    model,
                )),
                Domain::Action => Arc::new(ActionAgent::new(
                    agent_id.clone(),
                    lookup_connector(agent_id, agent.connector.as_deref())?,
                )),
                Domain::Scheduler => Arc::new(SchedulerAgent::new(
                    agent_id.clone(),
                    lookup_connector(agent_id, agent.connector.as_deref())?,
                )),
                Domain::Compliance => Arc::new(ComplianceAgent::new(
                    agent_id.clone(),
                    lookup_connector(agent_id, agent.connector.as_deref())?,
                )),
            };
            builder = builder.agent(instance);
        }

        let floor = config.classifier.confidence_floor;
        let classifier: Arc<dyn IntentClassifier> = match config.classifier.kind {
            ClassifierKind::Keyword => Arc::new(KeywordClassifier::new(floor)),
            ClassifierKind::Model => {
                let name = config.classifier.provider.as_deref();
                let provider = lookup_provider("classifier", name)?;
                let model = config
                    .classifier
                    .model
                    .clone()
                    .unwrap_or_else(|| provider.default_model().to_string());
                Arc::new(ModelIntentClassifier::new(provider, model, floor))
            }
        };

        Ok(builder.classifier(classifier).build())
    }

    /// Handle one utterance. Always returns by the request deadline.
    pub async fn handle(&self, text: &str, conversation_id: &str, principal: &Principal) -> Response {
        self.handle_with_cancel(text, conversation_id, principal, &CancellationToken::new())
            .await
    }

    /// Like [`Copilot::handle`], stopping early when `cancel` fires.
    pub async fn handle_with_cancel(
        &self,
        text: &str,
        conversation_id: &str,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Response {
        let started = Instant::now();
        let deadline = started + self.request_timeout;
        let request_id = Uuid::new_v4();
        let mut diagnostics = Diagnostics {
            lifecycle: vec![LifecycleState::Received],
            ..Default::default()
        };

        info!(%request_id, %conversation_id, user = %principal.user_id, "request received");

        let utterance = Utterance::new(text, conversation_id, principal);
        let context = self.context.load(conversation_id);
        let user_turn = Turn::user(text);
        self.context.append_turn(conversation_id, user_turn.clone());

        diagnostics.lifecycle.push(LifecycleState::Planning);
        let planned = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Planning("cancelled during planning".to_string())),
            classified = tokio::time::timeout_at(deadline, self.classifier.classify(&utterance, &context)) => {
                match classified {
                    Ok(Ok(intents)) => Ok(intents),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(AppError::Timeout("classification exceeded the request deadline".to_string())),
                }
            }
        }
        .and_then(|intents| {
            let plan = self.routing.plan(&intents, &self.registry.snapshot())?;
            Ok((intents, plan))
        });

        let (intents, plan) = match planned {
            Ok(planned) => planned,
            Err(e) => {
                warn!(%request_id, error = %e, "planning failed");
                diagnostics.cancelled = cancel.is_cancelled();
                return self
                    .fail(request_id, conversation_id, user_turn, diagnostics, started, deadline, Vec::new())
                    .await;
            }
        };
        diagnostics.intents = intents.clone();

        if plan.routable_count() == 0 {
            warn!(%request_id, steps = plan.len(), "no routable step");
            let results = unroutable_results(&plan);
            return self
                .fail(request_id, conversation_id, user_turn, diagnostics, started, deadline, results)
                .await;
        }

        diagnostics.lifecycle.push(LifecycleState::Dispatching);
        let dispatch_ctx = DispatchContext {
            request_id,
            utterance,
            principal: principal.clone(),
            history: context.turns_vec(),
        };
        let outcome = self.dispatcher.run(&plan, &dispatch_ctx, deadline, cancel).await;
        diagnostics.deadline_exceeded = outcome.deadline_exceeded;
        diagnostics.cancelled = outcome.cancelled;

        diagnostics.lifecycle.push(LifecycleState::Synthesizing);
        let (sections, status) = synthesize(&plan, &outcome.results);
        diagnostics.results = outcome.results;
        diagnostics.lifecycle.push(LifecycleState::Completed);
        diagnostics.elapsed_ms = started.elapsed().as_millis() as u64;

        let response = Response {
            request_id,
            conversation_id: conversation_id.to_string(),
            status,
            sections,
            diagnostics,
        };

        if let Some(top) = intents.first() {
            self.context
                .replace_slots(conversation_id, &top.extracted_slots, self.slot_ttl);
        }
        let routed: Vec<Domain> = plan
            .steps()
            .iter()
            .filter(|s| s.is_routable())
            .map(|s| s.domain)
            .collect();
        self.finish(&response, user_turn, routed, deadline).await;

        info!(
            %request_id,
            status = ?response.status,
            sections = response.sections.len(),
            elapsed_ms = response.diagnostics.elapsed_ms,
            "request completed"
        );
        response
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail(
        &self,
        request_id: Uuid,
        conversation_id: &str,
        user_turn: Turn,
        mut diagnostics: Diagnostics,
        started: Instant,
        deadline: Instant,
        results: Vec<AgentResult>,
    ) -> Response {
        diagnostics.lifecycle.push(LifecycleState::Failed);
        diagnostics.results = results;
        diagnostics.elapsed_ms = started.elapsed().as_millis() as u64;
        let response = Response {
            request_id,
            conversation_id: conversation_id.to_string(),
            status: ResponseStatus::Failed,
            sections: Vec::new(),
            diagnostics,
        };
        self.finish(&response, user_turn, Vec::new(), deadline).await;
        response
    }

    /// Record stats, the assistant turn and the transcript. The sink gets
    /// whatever is left of the request deadline.
    async fn finish(&self, response: &Response, user_turn: Turn, routed: Vec<Domain>, deadline: Instant) {
        self.stats.lock().record(
            response.status,
            response.diagnostics.elapsed_ms,
            &response.diagnostics.results,
        );

        let assistant_turn = Turn::assistant(response.render_markdown(), routed);
        self.context
            .append_turn(&response.conversation_id, assistant_turn.clone());

        if let Some(sink) = &self.transcripts {
            let turns = [user_turn, assistant_turn];
            match tokio::time::timeout_at(deadline, sink.record(&response.conversation_id, &turns)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(request_id = %response.request_id, error = %e, "failed to record transcript");
                }
                Err(_) => {
                    warn!(request_id = %response.request_id, "transcript sink exceeded the request deadline");
                }
            }
        }
    }

    /// Add an agent instance and advertise it in the registry.
    pub fn register_agent(&self, agent: Arc<dyn Agent>) {
        let descriptor = agent.descriptor();
        self.pool.insert(agent);
        self.registry.register(descriptor);
    }

    /// Withdraw an agent. In-flight steps on it still finish.
    pub fn deregister_agent(&self, agent_id: &str) -> bool {
        let removed = self.registry.deregister(agent_id);
        self.pool.remove(agent_id);
        removed
    }

    /// Run one round of health probes now.
    pub async fn probe_agents(&self) -> Vec<ProbeReport> {
        self.health.probe_once().await
    }

    /// Start periodic health probing until `shutdown` is cancelled.
    pub fn start_health_monitor(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.health.spawn(shutdown)
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats.lock().snapshot()
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn context_manager(&self) -> &Arc<ContextManager> {
        &self.context
    }

    pub fn routing_engine(&self) -> &RoutingEngine {
        &self.routing
    }
}

fn unroutable_results(plan: &ExecutionPlan) -> Vec<AgentResult> {
    plan.steps()
        .iter()
        .map(|step| {
            let reason = match &step.target {
                StepTarget::Unroutable { reason } => reason.clone(),
                StepTarget::Agent(id) => format!("agent '{}' was not dispatched", id),
            };
            AgentResult::failure(
                step.step_id,
                step.domain,
                None,
                StepError::new(StepErrorKind::Planning, reason),
                0,
            )
        })
        .collect()
}

/// Builder for [`Copilot`]. Anything not set falls back to its default.
pub struct CopilotBuilder {
    agents: Vec<Arc<dyn Agent>>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    routing: Option<RoutingEngine>,
    authorizer: Option<Arc<dyn Authorizer>>,
    context: Option<ContextManager>,
    transcripts: Option<Arc<dyn TranscriptSink>>,
    health: HealthMonitorConfig,
    step_timeout: Duration,
    request_timeout: Duration,
    slot_ttl: Option<Duration>,
}

impl Default for CopilotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CopilotBuilder {
    pub fn new() -> Self {
        Self {
            agents: Vec::new(),
            classifier: None,
            routing: None,
            authorizer: None,
            context: None,
            transcripts: None,
            health: HealthMonitorConfig::default(),
            step_timeout: DEFAULT_STEP_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            slot_ttl: None,
        }
    }

    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn routing_engine(mut self, routing: RoutingEngine) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Defaults to allowing everything.
    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn context_manager(mut self, context: ContextManager) -> Self {
        self.context = Some(context);
        self
    }

    pub fn transcript_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.transcripts = Some(sink);
        self
    }

    pub fn health_config(mut self, config: HealthMonitorConfig) -> Self {
        self.health = config;
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn slot_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.slot_ttl = ttl;
        self
    }

    pub fn build(self) -> Copilot {
        let registry = Arc::new(CapabilityRegistry::new());
        let pool = Arc::new(AgentPool::new());
        for agent in self.agents {
            registry.register(agent.descriptor());
            pool.insert(agent);
        }

        let authorizer = self.authorizer.unwrap_or_else(|| Arc::new(AllowAll));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&pool),
            self.health,
        ));

        Copilot {
            dispatcher: StepDispatcher::new(Arc::clone(&pool), authorizer, self.step_timeout),
            registry,
            pool,
            health,
            classifier: self
                .classifier
                .unwrap_or_else(|| Arc::new(KeywordClassifier::default())),
            routing: self.routing.unwrap_or_default(),
            context: Arc::new(self.context.unwrap_or_default()),
            transcripts: self.transcripts,
            request_timeout: self.request_timeout,
            slot_ttl: self.slot_ttl,
            stats: Mutex::new(StatsState::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentOutput;

    fn result(agent: &str, status: StepStatus) -> AgentResult {
        match status {
            StepStatus::Success => {
                AgentResult::success(0, Domain::Query, agent, AgentOutput::text("ok"), 5)
            }
            StepStatus::Skipped => AgentResult::skipped(0, Domain::Query, Some(agent.into()), Some(1)),
            _ => AgentResult::failure(
                0,
                Domain::Query,
                Some(agent.into()),
                StepError::new(StepErrorKind::AgentExecution, "x"),
                5,
            ),
        }
    }

    #[test]
    fn test_stats_counts_dispatched_steps_only() {
        let mut stats = StatsState::default();
        stats.record(
            ResponseStatus::PartialSuccess,
            100,
            &[result("query-1", StepStatus::Success), result("analytics-1", StepStatus::Skipped)],
        );
        stats.record(ResponseStatus::Succeeded, 300, &[result("query-1", StepStatus::Success)]);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.partial, 1);
        assert_eq!(snapshot.average_latency_ms, 200.0);
        assert_eq!(snapshot.success_rate, 50.0);
        assert_eq!(snapshot.agent_usage.get("query-1"), Some(&2));
        assert!(!snapshot.agent_usage.contains_key("analytics-1"));
        assert!(snapshot.recommendations[0].contains("query-1"));
        assert!(snapshot
            .recommendations
            .iter()
            .any(|r| r.contains("failure patterns")));
    }

    #[test]
    fn test_empty_stats_have_no_recommendations() {
        let snapshot = StatsState::default().snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert!(snapshot.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_from_config_wires_enabled_agents() {
        let toml = r#"
[connectors.erp]
base_url = "http://localhost:9000"

[agents.action-1]
domain = "action"
connector = "erp"

[agents.compliance-1]
domain = "compliance"
connector = "erp"

[agents.scheduler-1]
domain = "scheduler"
connector = "erp"
enabled = false
"#;
        let config = CopilotConfig::from_toml_str(toml).unwrap();
        let copilot = Copilot::from_config(&config).await.unwrap();

        assert_eq!(copilot.registry().len(), 2);
        assert!(copilot.registry().get("scheduler-1").is_none());
        assert_eq!(copilot.registry().list(Domain::Action).len(), 1);
    }
}
