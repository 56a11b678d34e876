//! Specialized agents and the shared agent contract
//!
//! Each agent serves one or more [`Domain`]s and executes a single plan step.
//! Agents never see each other directly; dependent steps receive upstream
//! outputs through [`AgentTask::upstream`].

pub mod action;
pub mod analytics;
pub mod compliance;
pub mod health;
pub mod help;
pub mod orchestrator;
pub mod pool;
pub mod query;
pub mod registry;
pub mod router;
pub mod scheduler;

use crate::llm::ChatMessage;
use crate::memory::{truncate_history, PROMPT_HISTORY_WINDOW};
use crate::types::{
    AgentDescriptor, AgentOutput, Domain, MessageRole, Principal, Result, Slots, Turn, Utterance,
};
use async_trait::async_trait;
use uuid::Uuid;

pub use action::ActionAgent;
pub use analytics::AnalyticsAgent;
pub use compliance::ComplianceAgent;
pub use health::{HealthMonitor, HealthMonitorConfig};
pub use help::HelpAgent;
pub use orchestrator::{Copilot, CopilotBuilder, OrchestratorStats, TranscriptSink};
pub use pool::{AgentLease, AgentPool};
pub use query::QueryAgent;
pub use registry::{CapabilityRegistry, RegistrySnapshot};
pub use router::{IntentClassifier, KeywordClassifier, ModelIntentClassifier};
pub use scheduler::SchedulerAgent;

/// Output of a step this task depends on.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamOutcome {
    Available(AgentOutput),
    /// The dependency timed out; the dependent proceeds without its data.
    Absent { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamOutput {
    pub step_id: usize,
    pub domain: Domain,
    pub agent_id: Option<String>,
    pub outcome: UpstreamOutcome,
}

impl UpstreamOutput {
    pub fn output(&self) -> Option<&AgentOutput> {
        match &self.outcome {
            UpstreamOutcome::Available(out) => Some(out),
            UpstreamOutcome::Absent { .. } => None,
        }
    }
}

/// One unit of work handed to an agent.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub request_id: Uuid,
    pub step_id: usize,
    pub domain: Domain,
    pub utterance: Utterance,
    pub principal: Principal,
    pub slots: Slots,
    pub upstream: Vec<UpstreamOutput>,
    /// Recent conversation turns, oldest first.
    pub history: Vec<Turn>,
}

impl AgentTask {
    pub fn slot(&self, key: &str) -> Option<&str> {
        self.slots.get(key).map(String::as_str)
    }

    /// Upstream output produced for `domain`, if any arrived.
    pub fn upstream_for(&self, domain: Domain) -> Option<&UpstreamOutput> {
        self.upstream.iter().find(|u| u.domain == domain)
    }
}

/// Base trait for all agents
#[async_trait]
pub trait Agent: Send + Sync {
    fn agent_id(&self) -> &str;

    /// Domains this agent can serve.
    fn domains(&self) -> Vec<Domain>;

    fn capability_version(&self) -> &str {
        "1.0.0"
    }

    /// Execute one plan step.
    async fn execute(&self, task: &AgentTask) -> Result<AgentOutput>;

    /// Reachability probe used by the health monitor.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor::new(self.agent_id(), self.domains())
            .with_version(self.capability_version())
    }
}

/// Chat messages for a model-backed agent: the system prompt, optional
/// grounding context, recent history and finally the utterance itself.
pub(crate) fn build_messages(
    system_prompt: &str,
    context: Option<&str>,
    task: &AgentTask,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];
    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        messages.push(ChatMessage::system(context));
    }
    for turn in truncate_history(&task.history, PROMPT_HISTORY_WINDOW) {
        messages.push(match turn.role {
            MessageRole::Assistant => ChatMessage::assistant(turn.content.clone()),
            MessageRole::User => ChatMessage::user(turn.content.clone()),
            MessageRole::System => ChatMessage::system(turn.content.clone()),
        });
    }
    messages.push(ChatMessage::user(task.utterance.text.clone()));
    messages
}

/// First table entry whose keywords occur in `text`, else `fallback`.
pub(crate) fn detect_kind(text: &str, table: &[(&'static str, &[&str])], fallback: &'static str) -> &'static str {
    let lower = text.to_lowercase();
    table
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(kind, _)| *kind)
        .unwrap_or(fallback)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::llm::{GenerationParams, ModelProvider};
    use crate::types::AppError;
    use parking_lot::Mutex;

    /// Provider returning a canned reply and recording every prompt.
    pub struct CannedProvider {
        pub reply: std::result::Result<String, String>,
        pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl CannedProvider {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        /// Concatenated text of the most recent prompt.
        pub fn last_prompt(&self) -> String {
            self.prompts
                .lock()
                .last()
                .map(|m| m.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n"))
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ModelProvider for CannedProvider {
        async fn generate(
            &self,
            messages: &[ChatMessage],
            _model: &str,
            _params: &GenerationParams,
        ) -> Result<String> {
            self.prompts.lock().push(messages.to_vec());
            self.reply
                .clone()
                .map_err(|m| AppError::provider(m, false))
        }

        fn default_model(&self) -> &str {
            "test-model"
        }
    }

    pub fn task(domain: Domain, text: &str, slots: &[(&str, &str)]) -> AgentTask {
        let principal = Principal::new("u-1", "org-1").with_role("admin");
        AgentTask {
            request_id: Uuid::new_v4(),
            step_id: 0,
            domain,
            utterance: Utterance::new(text, "conv-1", &principal),
            principal,
            slots: slots
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            upstream: Vec::new(),
            history: vec![Turn {
                role: MessageRole::User,
                content: "earlier question".into(),
                timestamp: chrono::Utc::now(),
                domains: vec![],
            }],
        }
    }
}
