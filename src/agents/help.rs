use super::{build_messages, detect_kind, Agent, AgentTask};
use crate::llm::{GenerationParams, ModelProvider};
use crate::rag::{KnowledgeRetrieval, SearchFilters};
use crate::types::{AgentOutput, Domain, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

const TOPICS: &[(&str, &[&str])] = &[
    ("troubleshooting", &["error", "problem", "issue", "bug", "fix", "doesn't work", "failed"]),
    ("tutorial", &["tutorial", "step by step", "walkthrough", "learn"]),
    ("workflow_guide", &["workflow", "process", "procedure", "how do i"]),
    ("integration_help", &["integrate", "integration", "api", "connect"]),
    ("security_help", &["security", "permission", "access", "password"]),
    ("best_practices", &["best practice", "recommend", "guideline"]),
    ("feature_guide", &["how to", "guide", "explain", "what is", "feature"]),
];

const EXPERTISE: &[(&str, &[&str])] = &[
    ("admin", &["admin", "configure", "setup"]),
    ("advanced", &["advanced", "expert", "custom", "technical"]),
    ("beginner", &["beginner", "new to", "basic", "simple"]),
];

/// Answers how-to and troubleshooting questions from the help corpus.
pub struct HelpAgent {
    agent_id: String,
    knowledge: Arc<dyn KnowledgeRetrieval>,
    provider: Arc<dyn ModelProvider>,
    model: String,
}

impl HelpAgent {
    pub fn new(
        agent_id: impl Into<String>,
        knowledge: Arc<dyn KnowledgeRetrieval>,
        provider: Arc<dyn ModelProvider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            knowledge,
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Agent for HelpAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn domains(&self) -> Vec<Domain> {
        vec![Domain::Help]
    }

    async fn execute(&self, task: &AgentTask) -> Result<AgentOutput> {
        let text = &task.utterance.text;
        let topic = detect_kind(text, TOPICS, "general_help");
        let level = detect_kind(text, EXPERTISE, "intermediate");

        let hits = self
            .knowledge
            .search(text, &SearchFilters::new(), 3)
            .await?;

        let context = if hits.is_empty() {
            String::new()
        } else {
            let passages: Vec<String> = hits
                .iter()
                .map(|h| format!("- {} (from {})", h.content, h.source))
                .collect();
            format!("Help articles:\n{}", passages.join("\n"))
        };

        let system_prompt = format!(
            "You are the Help agent of an ERP copilot. The user needs {} at a {} level. \
             Give short numbered steps, cite the help article you used, and point to the \
             relevant screen or menu when you know it.",
            topic.replace('_', " "),
            level
        );
        let messages = build_messages(&system_prompt, Some(&context), task);
        let answer = self
            .provider
            .generate(&messages, &self.model, &GenerationParams::default().with_temperature(0.3))
            .await?;

        Ok(AgentOutput::text(answer)
            .with_data(json!({ "topic": topic, "expertise": level }))
            .with_sources(hits.into_iter().map(|h| h.source).collect()))
    }

    async fn health_check(&self) -> Result<()> {
        self.provider.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::{task, CannedProvider};
    use crate::rag::{InMemoryKnowledgeBase, KnowledgeDocument};

    #[tokio::test]
    async fn test_help_detects_topic_and_cites_articles() {
        let kb = Arc::new(InMemoryKnowledgeBase::with_documents([KnowledgeDocument::new(
            "expenses",
            "Expense claims are filed under Finance > Claims with a receipt attached",
            "help/expenses.md",
        )]));
        let provider = Arc::new(CannedProvider::replying("1. Open Finance > Claims"));
        let agent = HelpAgent::new("help-1", kb, provider.clone(), "test-model");

        let out = agent
            .execute(&task(Domain::Help, "explain how to file an expense claim", &[]))
            .await
            .unwrap();

        assert_eq!(out.data["topic"], "feature_guide");
        assert_eq!(out.sources, vec!["help/expenses.md"]);
        assert!(provider.last_prompt().contains("Finance > Claims with a receipt"));
    }

    #[tokio::test]
    async fn test_troubleshooting_takes_precedence() {
        let provider = Arc::new(CannedProvider::replying("Try again"));
        let agent = HelpAgent::new(
            "help-1",
            Arc::new(InMemoryKnowledgeBase::new()),
            provider,
            "test-model",
        );
        let out = agent
            .execute(&task(Domain::Help, "how to fix the export error", &[]))
            .await
            .unwrap();
        assert_eq!(out.data["topic"], "troubleshooting");
        assert!(out.sources.is_empty());
    }
}
