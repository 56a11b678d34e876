use super::action::ActionRequest;
use super::{detect_kind, Agent, AgentTask};
use crate::connectors::{AuthContext, ErpConnector};
use crate::types::{AgentOutput, Domain, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

const FREQUENCIES: &[(&str, &[&str])] = &[
    ("hourly", &["hourly", "every hour"]),
    ("daily", &["daily", "every day"]),
    ("weekly", &["weekly", "every week"]),
    ("monthly", &["monthly", "every month"]),
];

/// Books meetings, reminders and recurring jobs through the ERP calendar.
pub struct SchedulerAgent {
    agent_id: String,
    connector: Arc<dyn ErpConnector>,
}

impl SchedulerAgent {
    pub fn new(agent_id: impl Into<String>, connector: Arc<dyn ErpConnector>) -> Self {
        Self {
            agent_id: agent_id.into(),
            connector,
        }
    }
}

#[async_trait]
impl Agent for SchedulerAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn domains(&self) -> Vec<Domain> {
        vec![Domain::Scheduler]
    }

    async fn execute(&self, task: &AgentTask) -> Result<AgentOutput> {
        let request = ActionRequest::from_slots(Domain::Scheduler, &task.slots)?;
        let frequency = detect_kind(&task.utterance.text, FREQUENCIES, "one_time");
        let when = task.slot("date").map(str::to_string);

        let payload = json!({
            "entity": request.entity,
            "entity_id": request.entity_id,
            "frequency": frequency,
            "date": when,
            "instruction": task.utterance.text,
        });
        let auth = AuthContext::new(task.principal.clone(), task.request_id);
        let operation = request.operation();
        let result = self.connector.invoke(&operation, payload, &auth).await?;

        info!(agent_id = %self.agent_id, %operation, frequency, "schedule updated");

        let summary = match result.get("message").and_then(|m| m.as_str()) {
            Some(message) => message.to_string(),
            None => {
                let mut s = format!("Scheduled {} ({})", request.entity, frequency.replace('_', " "));
                if let Some(when) = &when {
                    s.push_str(&format!(" for {}", when));
                }
                if let Some(next) = result.get("next_run").and_then(|n| n.as_str()) {
                    s.push_str(&format!(", next run {}", next));
                }
                s.push('.');
                s
            }
        };

        Ok(AgentOutput::text(summary)
            .with_data(json!({
                "action": request.action,
                "frequency": frequency,
                "date": when,
                "result": result,
            }))
            .with_sources(vec![format!("{}:{}", self.connector.name(), operation)]))
    }

    async fn health_check(&self) -> Result<()> {
        self.connector.health_check().await
    }
}
