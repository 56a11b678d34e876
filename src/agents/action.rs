//! Action agent: state-changing ERP operations.

use super::{Agent, AgentTask};
use crate::connectors::{AuthContext, ErpConnector};
use crate::types::{AgentOutput, AppError, Domain, Result, Slots};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Verbs the action agent accepts.
pub const SUPPORTED_ACTIONS: &[&str] = &[
    "create", "update", "delete", "approve", "reject", "assign", "schedule", "notify", "export",
    "import",
];

/// A state-changing request derived from extracted slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
}

impl ActionRequest {
    /// Derive the request from extracted slots.
    ///
    /// Scheduler steps default to booking on the calendar. Action steps never
    /// guess: a missing or unsupported verb, or a missing entity, is a
    /// [`AppError::Clarification`] and nothing is executed.
    pub fn from_slots(domain: Domain, slots: &Slots) -> Result<Self> {
        let entity_id = ["employee_id", "sku", "record_id"]
            .iter()
            .find_map(|k| slots.get(*k).cloned());
        let action = slots.get("action").cloned();
        let entity = slots.get("entity").cloned();

        if domain == Domain::Scheduler {
            return Ok(Self {
                action: action.unwrap_or_else(|| "schedule".to_string()),
                entity: entity.unwrap_or_else(|| "calendar".to_string()),
                entity_id,
            });
        }

        let action = match action {
            Some(action) if SUPPORTED_ACTIONS.contains(&action.as_str()) => action,
            Some(action) => {
                return Err(AppError::Clarification(format!(
                    "'{}' is not an action I can perform. Supported actions: {}.",
                    action,
                    SUPPORTED_ACTIONS.join(", ")
                )))
            }
            None => {
                return Err(AppError::Clarification(format!(
                    "Could not determine the action type. Please say what to do, for example: {}.",
                    SUPPORTED_ACTIONS.join(", ")
                )))
            }
        };
        let Some(entity) = entity else {
            return Err(AppError::Clarification(format!(
                "Could not determine which record to {}. Please name it, for example an employee, order or invoice.",
                action
            )));
        };

        Ok(Self {
            action,
            entity,
            entity_id,
        })
    }

    /// Resource name used for authorization, e.g. `employee/EMP-5`.
    pub fn resource(&self) -> String {
        match &self.entity_id {
            Some(id) => format!("{}/{}", self.entity, id),
            None => self.entity.clone(),
        }
    }

    /// Connector operation name, e.g. `employee.update`.
    pub fn operation(&self) -> String {
        format!("{}.{}", self.entity, self.action)
    }
}

pub struct ActionAgent {
    agent_id: String,
    connector: Arc<dyn ErpConnector>,
}

impl ActionAgent {
    pub fn new(agent_id: impl Into<String>, connector: Arc<dyn ErpConnector>) -> Self {
        Self {
            agent_id: agent_id.into(),
            connector,
        }
    }
}

#[async_trait]
impl Agent for ActionAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn domains(&self) -> Vec<Domain> {
        vec![Domain::Action]
    }

    async fn execute(&self, task: &AgentTask) -> Result<AgentOutput> {
        let request = ActionRequest::from_slots(Domain::Action, &task.slots)?;

        let auth = AuthContext::new(task.principal.clone(), task.request_id);
        let payload = json!({
            "entity": request.entity,
            "entity_id": request.entity_id,
            "fields": task.slots,
            "instruction": task.utterance.text,
        });

        let result = self
            .connector
            .invoke(&request.operation(), payload, &auth)
            .await?;

        info!(
            agent_id = %self.agent_id,
            operation = %request.operation(),
            user = %task.principal.user_id,
            "action executed"
        );

        let summary = result
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Completed {} on {}.", request.action, request.resource()));

        Ok(AgentOutput::text(summary)
            .with_data(json!({
                "action": request.action,
                "entity_type": request.entity,
                "entity_id": request.entity_id,
                "result": result,
            }))
            .with_sources(vec![format!("{}:{}", self.connector.name(), request.operation())]))
    }

    async fn health_check(&self) -> Result<()> {
        self.connector.health_check().await
    }
}
