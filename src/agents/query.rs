use super::{build_messages, detect_kind, Agent, AgentTask};
use crate::llm::{GenerationParams, ModelProvider};
use crate::rag::{KnowledgeHit, KnowledgeRetrieval, SearchFilters};
use crate::types::{AgentOutput, Domain, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_MAX_RESULTS: usize = 5;

const MODULES: &[(&str, &[&str])] = &[
    ("inventory", &["inventory", "stock", "sku", "warehouse", "units"]),
    ("sales", &["sales", "order", "customer", "revenue"]),
    ("finance", &["invoice", "payment", "budget", "expense", "ledger"]),
    ("hr", &["employee", "payroll", "leave", "headcount", "emp-"]),
    ("production", &["production", "manufactur", "work order", "bom"]),
];

/// Answers read-only questions from retrieved ERP knowledge.
pub struct QueryAgent {
    agent_id: String,
    knowledge: Arc<dyn KnowledgeRetrieval>,
    provider: Arc<dyn ModelProvider>,
    model: String,
    max_results: usize,
}

impl QueryAgent {
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
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    fn system_prompt(&self, module: &str) -> String {
        format!(
            "You are the Query agent of an ERP copilot. Answer questions about {} data \
             using only the records provided. Quote figures exactly, name the record they \
             come from, and say plainly when the records do not contain the answer.",
            module
        )
    }
}

fn format_hits(hits: &[KnowledgeHit]) -> String {
    if hits.is_empty() {
        return "No matching records were found.".to_string();
    }
    let lines: Vec<String> = hits
        .iter()
        .enumerate()
        .map(|(i, h)| format!("[{}] ({}) {}", i + 1, h.source, h.content))
        .collect();
    format!("Relevant records:\n{}", lines.join("\n"))
}

#[async_trait]
impl Agent for QueryAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn domains(&self) -> Vec<Domain> {
        vec![Domain::Query]
    }

    async fn execute(&self, task: &AgentTask) -> Result<AgentOutput> {
        let module = detect_kind(&task.utterance.text, MODULES, "general");

        let mut filters = SearchFilters::new();
        if let Some(m) = task.slot("module") {
            filters.insert("module".to_string(), m.to_string());
        }

        // identifiers make far better lexical queries than the sentence
        let query = match (task.slot("sku"), task.slot("employee_id")) {
            (Some(sku), _) => format!("{} {}", sku, task.utterance.text),
            (None, Some(emp)) => format!("{} {}", emp, task.utterance.text),
            (None, None) => task.utterance.text.clone(),
        };

        let hits = self
            .knowledge
            .search(&query, &filters, self.max_results)
            .await?;
        debug!(agent_id = %self.agent_id, module, hits = hits.len(), "knowledge retrieved");

        let context = format_hits(&hits);
        let messages = build_messages(&self.system_prompt(module), Some(&context), task);
        let answer = self
            .provider
            .generate(&messages, &self.model, &GenerationParams::default().with_temperature(0.1))
            .await?;

        let mut sources: Vec<String> = Vec::new();
        for hit in &hits {
            if !sources.contains(&hit.source) {
                sources.push(hit.source.clone());
            }
        }

        Ok(AgentOutput::text(answer)
            .with_data(json!({
                "module": module,
                "records": hits,
            }))
            .with_sources(sources))
    }

    async fn health_check(&self) -> Result<()> {
        self.provider.health_check().await
    }
}
