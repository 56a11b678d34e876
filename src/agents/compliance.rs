//! Compliance agent.
//!
//! Runs policy checks through the ERP connector. When it follows an Action
//! step the action's result is submitted as the subject of the check; when
//! that result is absent the check runs on the request alone and the answer
//! says so.

use super::{detect_kind, Agent, AgentTask, UpstreamOutcome};
use crate::connectors::{AuthContext, ErpConnector};
use crate::types::{AgentOutput, Domain, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

const CHECKS: &[(&str, &[&str])] = &[
    ("gdpr", &["gdpr", "privacy", "personal data", "data protection"]),
    ("sox", &["sox", "sarbanes", "financial control"]),
    ("hipaa", &["hipaa", "medical", "health data"]),
    ("pci", &["pci", "payment card", "credit card"]),
    ("retention", &["retention", "archival", "lifecycle"]),
    ("access", &["access", "permission", "role"]),
    ("violation", &["violation", "breach", "incident"]),
    ("report", &["compliance report", "regulatory report"]),
    ("audit", &["audit", "review", "assess"]),
];

const SEVERITIES: &[(&str, &[&str])] = &[
    ("critical", &["critical", "urgent", "immediately"]),
    ("high", &["high", "major", "significant"]),
    ("low", &["minor", "routine", "low"]),
];

pub struct ComplianceAgent {
    agent_id: String,
    connector: Arc<dyn ErpConnector>,
}

impl ComplianceAgent {
    pub fn new(agent_id: impl Into<String>, connector: Arc<dyn ErpConnector>) -> Self {
        Self {
            agent_id: agent_id.into(),
            connector,
        }
    }
}

#[async_trait]
impl Agent for ComplianceAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn domains(&self) -> Vec<Domain> {
        vec![Domain::Compliance]
    }

    async fn execute(&self, task: &AgentTask) -> Result<AgentOutput> {
        let check = detect_kind(&task.utterance.text, CHECKS, "general");
        let severity = detect_kind(&task.utterance.text, SEVERITIES, "medium");

        let (subject, absence) = match task.upstream_for(Domain::Action).map(|u| &u.outcome) {
            Some(UpstreamOutcome::Available(output)) => (output.data.clone(), None),
            Some(UpstreamOutcome::Absent { reason }) => (serde_json::Value::Null, Some(reason.clone())),
            None => (serde_json::Value::Null, None),
        };

        let payload = json!({
            "check": check,
            "severity": severity,
            "subject": subject,
            "instruction": task.utterance.text,
        });
        let auth = AuthContext::new(task.principal.clone(), task.request_id);
        let result = self.connector.invoke("compliance.check", payload, &auth).await?;

        let status = result
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("recorded")
            .to_string();
        let findings: Vec<String> = result
            .get("findings")
            .and_then(|f| f.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        info!(agent_id = %self.agent_id, check, %status, findings = findings.len(), "compliance check complete");

        let mut content = format!("Compliance check ({}): {}.", check, status);
        for finding in &findings {
            content.push_str(&format!("\n- {}", finding));
        }
        if let Some(reason) = &absence {
            content.push_str(&format!(
                "\nThe preceding action result was not available ({}); the check covered the request only.",
                reason
            ));
        }

        Ok(AgentOutput::text(content)
            .with_data(json!({
                "check": check,
                "severity": severity,
                "status": status,
                "findings": findings,
                "subject_available": absence.is_none() && !subject.is_null(),
            }))
            .with_sources(vec![format!("{}:compliance.check", self.connector.name())]))
    }

    async fn health_check(&self) -> Result<()> {
        self.connector.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::task;
    use crate::agents::UpstreamOutput;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Policy {
        payloads: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl ErpConnector for Policy {
        async fn invoke(
            &self,
            operation: &str,
            payload: serde_json::Value,
            _auth: &AuthContext,
        ) -> Result<serde_json::Value> {
            assert_eq!(operation, "compliance.check");
            self.payloads.lock().push(payload);
            Ok(json!({"status": "compliant", "findings": ["Change logged in audit trail"]}))
        }

        fn name(&self) -> &str {
            "erp"
        }
    }

    #[tokio::test]
    async fn test_checks_upstream_action_result() {
        let connector = Arc::new(Policy::default());
        let agent = ComplianceAgent::new("compliance-1", connector.clone());
        let mut t = task(Domain::Compliance, "update employee record and confirm compliance", &[]);
        t.upstream.push(UpstreamOutput {
            step_id: 0,
            domain: Domain::Action,
            agent_id: Some("action-1".into()),
            outcome: UpstreamOutcome::Available(
                AgentOutput::text("Updated").with_data(json!({"entity_id": "EMP-5"})),
            ),
        });

        let out = agent.execute(&t).await.unwrap();

        assert_eq!(
            out.content,
            "Compliance check (general): compliant.\n- Change logged in audit trail"
        );
        assert_eq!(out.data["subject_available"], true);
        assert_eq!(connector.payloads.lock()[0]["subject"]["entity_id"], "EMP-5");
    }

    #[tokio::test]
    async fn test_absent_action_result_is_noted() {
        let agent = ComplianceAgent::new("compliance-1", Arc::new(Policy::default()));
        let mut t = task(Domain::Compliance, "run a gdpr audit", &[]);
        t.upstream.push(UpstreamOutput {
            step_id: 0,
            domain: Domain::Action,
            agent_id: Some("action-1".into()),
            outcome: UpstreamOutcome::Absent {
                reason: "timed out".into(),
            },
        });

        let out = agent.execute(&t).await.unwrap();

        assert_eq!(out.data["check"], "gdpr");
        assert_eq!(out.data["subject_available"], false);
        assert!(out.content.contains("was not available (timed out)"));
    }
}
