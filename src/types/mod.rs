use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============= Domain Types =============

/// Closed set of capability domains an agent can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Query,
    Action,
    Analytics,
    Scheduler,
    Compliance,
    Help,
}

impl Domain {
    /// Every domain in tie-break order.
    pub const ALL: [Domain; 6] = [
        Domain::Query,
        Domain::Action,
        Domain::Analytics,
        Domain::Scheduler,
        Domain::Compliance,
        Domain::Help,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Query => "query",
            Domain::Action => "action",
            Domain::Analytics => "analytics",
            Domain::Scheduler => "scheduler",
            Domain::Compliance => "compliance",
            Domain::Help => "help",
        }
    }

    /// Domains whose agents mutate ERP state and must pass authorization.
    pub fn is_action_class(&self) -> bool {
        matches!(self, Domain::Action | Domain::Scheduler)
    }

    /// Human-readable label used in rendered responses.
    pub fn title(&self) -> &'static str {
        match self {
            Domain::Query => "Query",
            Domain::Action => "Action",
            Domain::Analytics => "Analytics",
            Domain::Scheduler => "Scheduler",
            Domain::Compliance => "Compliance",
            Domain::Help => "Help",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "query" => Ok(Domain::Query),
            "action" => Ok(Domain::Action),
            "analytics" => Ok(Domain::Analytics),
            "scheduler" => Ok(Domain::Scheduler),
            "compliance" => Ok(Domain::Compliance),
            "help" => Ok(Domain::Help),
            other => Err(AppError::InvalidInput(format!("unknown domain '{}'", other))),
        }
    }
}

/// Extracted request parameters, ordered for deterministic output.
pub type Slots = BTreeMap<String, String>;

// ============= Request Types =============

/// Authenticated caller identity. Credentials are verified upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub org_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            org_id: org_id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub user_id: String,
    pub org_id: String,
    pub conversation_id: String,
    pub received_at: DateTime<Utc>,
}

impl Utterance {
    pub fn new(
        text: impl Into<String>,
        conversation_id: impl Into<String>,
        principal: &Principal,
    ) -> Self {
        Self {
            text: text.into(),
            user_id: principal.user_id.clone(),
            org_id: principal.org_id.clone(),
            conversation_id: conversation_id.into(),
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub domain: Domain,
    pub confidence: f32,
    #[serde(default)]
    pub extracted_slots: Slots,
}

impl Intent {
    pub fn new(domain: Domain, confidence: f32) -> Self {
        Self {
            domain,
            confidence: confidence.clamp(0.0, 1.0),
            extracted_slots: Slots::new(),
        }
    }

    pub fn with_slots(mut self, slots: Slots) -> Self {
        self.extracted_slots = slots;
        self
    }
}

// ============= Registry Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unreachable,
}

impl HealthStatus {
    /// Lower is preferred when choosing between candidates.
    pub fn preference(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unreachable => 2,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

/// Registry entry for one agent instance.
///
/// `health_status`, `last_probe_at` and `load` belong to the health monitor;
/// re-registering an agent leaves them untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub domain_tags: Vec<Domain>,
    pub capability_version: String,
    pub health_status: HealthStatus,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub load: u32,
}

impl AgentDescriptor {
    pub fn new(agent_id: impl Into<String>, domain_tags: Vec<Domain>) -> Self {
        Self {
            agent_id: agent_id.into(),
            domain_tags,
            capability_version: "1.0.0".to_string(),
            health_status: HealthStatus::Healthy,
            last_probe_at: None,
            load: 0,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.capability_version = version.into();
        self
    }

    pub fn serves(&self, domain: Domain) -> bool {
        self.domain_tags.contains(&domain)
    }
}

// ============= Execution Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    Timeout,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    Planning,
    DispatchTimeout,
    AgentExecution,
    AuthorizationDenied,
    Provider,
    Cancelled,
    /// The request lacks detail the step needs; nothing was executed.
    Clarification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<AppError> for StepError {
    fn from(err: AppError) -> Self {
        let kind = match &err {
            AppError::Planning(_) => StepErrorKind::Planning,
            AppError::Provider { .. } => StepErrorKind::Provider,
            AppError::AuthorizationDenied(_) => StepErrorKind::AuthorizationDenied,
            AppError::Timeout(_) => StepErrorKind::DispatchTimeout,
            AppError::Clarification(_) => StepErrorKind::Clarification,
            _ => StepErrorKind::AgentExecution,
        };
        StepError::new(kind, err.to_string())
    }
}

/// What an agent hands back for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// User-facing text.
    pub content: String,
    /// Structured data for dependent steps.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Provenance of retrieved or invoked material.
    #[serde(default)]
    pub sources: Vec<String>,
}

impl AgentOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: serde_json::Value::Null,
            sources: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }
}

/// Terminal outcome of one plan step. Exactly one exists per step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub step_id: usize,
    pub agent_id: Option<String>,
    pub domain: Domain,
    pub status: StepStatus,
    pub payload: Option<AgentOutput>,
    pub error: Option<StepError>,
    pub latency_ms: u64,
    /// Step whose outcome prevented this one from running.
    pub blocked_by: Option<usize>,
}

impl AgentResult {
    pub fn success(
        step_id: usize,
        domain: Domain,
        agent_id: impl Into<String>,
        output: AgentOutput,
        latency_ms: u64,
    ) -> Self {
        Self {
            step_id,
            agent_id: Some(agent_id.into()),
            domain,
            status: StepStatus::Success,
            payload: Some(output),
            error: None,
            latency_ms,
            blocked_by: None,
        }
    }

    pub fn failure(
        step_id: usize,
        domain: Domain,
        agent_id: Option<String>,
        error: StepError,
        latency_ms: u64,
    ) -> Self {
        Self {
            step_id,
            agent_id,
            domain,
            status: StepStatus::Failure,
            payload: None,
            error: Some(error),
            latency_ms,
            blocked_by: None,
        }
    }

    pub fn timeout(step_id: usize, domain: Domain, agent_id: Option<String>, latency_ms: u64) -> Self {
        Self {
            step_id,
            agent_id,
            domain,
            status: StepStatus::Timeout,
            payload: None,
            error: Some(StepError::new(
                StepErrorKind::DispatchTimeout,
                format!("step {} exceeded its deadline", step_id),
            )),
            latency_ms,
            blocked_by: None,
        }
    }

    pub fn skipped(
        step_id: usize,
        domain: Domain,
        agent_id: Option<String>,
        blocked_by: Option<usize>,
    ) -> Self {
        Self {
            step_id,
            agent_id,
            domain,
            status: StepStatus::Skipped,
            payload: None,
            error: None,
            latency_ms: 0,
            blocked_by,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

// ============= Response Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Succeeded,
    PartialSuccess,
    Failed,
}

impl ResponseStatus {
    /// Overall status derived from step outcomes.
    pub fn from_results(results: &[AgentResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        if !results.is_empty() && succeeded == results.len() {
            ResponseStatus::Succeeded
        } else if succeeded > 0 {
            ResponseStatus::PartialSuccess
        } else {
            ResponseStatus::Failed
        }
    }
}

/// Request lifecycle states recorded in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Received,
    Planning,
    Dispatching,
    Synthesizing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub step_ids: Vec<usize>,
    pub contributors: Vec<String>,
    pub sources: Vec<String>,
    /// False when any step in the section did not succeed.
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub agent_id: String,
    pub domain: Domain,
    pub content: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub lifecycle: Vec<LifecycleState>,
    pub intents: Vec<Intent>,
    pub results: Vec<AgentResult>,
    pub elapsed_ms: u64,
    pub deadline_exceeded: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: Uuid,
    pub conversation_id: String,
    pub status: ResponseStatus,
    pub sections: Vec<Section>,
    pub diagnostics: Diagnostics,
}

impl Response {
    /// Render the sections as a single markdown answer.
    pub fn render_markdown(&self) -> String {
        if self.sections.len() == 1 && self.diagnostics.results.iter().all(|r| r.is_success()) {
            return self.sections[0].content.clone();
        }

        let mut parts = Vec::with_capacity(self.sections.len() + 1);
        for section in &self.sections {
            parts.push(format!(
                "**{} Agent Response**\n{}",
                section.domain.title(),
                section.content
            ));
        }

        parts.extend(
            self.diagnostics
                .results
                .iter()
                .filter_map(|r| r.error.as_ref())
                .filter(|e| e.kind == StepErrorKind::Clarification)
                .map(|e| e.message.clone()),
        );

        let failed: Vec<String> = self
            .diagnostics
            .results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| match &r.agent_id {
                Some(id) => format!("{} ({})", id, r.domain),
                None => r.domain.to_string(),
            })
            .collect();
        if !failed.is_empty() {
            parts.push(format!(
                "Note: some agents could not complete their part: {}",
                failed.join(", ")
            ));
        }

        if parts.is_empty() {
            return "I couldn't complete this request. Please try rephrasing it.".to_string();
        }
        parts.join("\n\n")
    }
}

// ============= Conversation Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One entry in a conversation's short-term history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Domains routed for this turn; empty for user turns.
    #[serde(default)]
    pub domains: Vec<Domain>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            domains: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, domains: Vec<Domain>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            domains,
        }
    }
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Connector error: {message}")]
    Connector { message: String, retryable: bool },

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Agent execution error: {0}")]
    AgentExecution(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Clarification needed: {0}")]
    Clarification(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn provider(message: impl Into<String>, retryable: bool) -> Self {
        AppError::Provider {
            message: message.into(),
            retryable,
        }
    }

    pub fn connector(message: impl Into<String>, retryable: bool) -> Self {
        AppError::Connector {
            message: message.into(),
            retryable,
        }
    }

    /// Whether a bounded retry may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Provider { retryable, .. } | AppError::Connector { retryable, .. } => {
                *retryable
            }
            AppError::Timeout(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_round_trips_through_str() {
        for domain in Domain::ALL {
            assert_eq!(domain.as_str().parse::<Domain>().unwrap(), domain);
        }
        assert!("payroll".parse::<Domain>().is_err());
    }

    #[test]
    fn test_action_class_domains() {
        assert!(Domain::Action.is_action_class());
        assert!(Domain::Scheduler.is_action_class());
        assert!(!Domain::Query.is_action_class());
        assert!(!Domain::Compliance.is_action_class());
    }

    #[test]
    fn test_intent_confidence_is_clamped() {
        assert_eq!(Intent::new(Domain::Help, 1.7).confidence, 1.0);
        assert_eq!(Intent::new(Domain::Help, -0.2).confidence, 0.0);
    }

    #[test]
    fn test_response_status_from_results() {
        let ok = AgentResult::success(0, Domain::Query, "q1", AgentOutput::text("ok"), 3);
        let skipped = AgentResult::skipped(1, Domain::Compliance, None, Some(0));

        assert_eq!(
            ResponseStatus::from_results(std::slice::from_ref(&ok)),
            ResponseStatus::Succeeded
        );
        assert_eq!(
            ResponseStatus::from_results(&[ok, skipped.clone()]),
            ResponseStatus::PartialSuccess
        );
        assert_eq!(ResponseStatus::from_results(&[skipped]), ResponseStatus::Failed);
        assert_eq!(ResponseStatus::from_results(&[]), ResponseStatus::Failed);
    }

    #[test]
    fn test_step_error_kind_mapping() {
        let e: StepError = AppError::provider("rate limited", true).into();
        assert_eq!(e.kind, StepErrorKind::Provider);

        let e: StepError = AppError::AuthorizationDenied("nope".into()).into();
        assert_eq!(e.kind, StepErrorKind::AuthorizationDenied);

        let e: StepError = AppError::connector("500", true).into();
        assert_eq!(e.kind, StepErrorKind::AgentExecution);

        let e: StepError = AppError::Clarification("which record?".into()).into();
        assert_eq!(e.kind, StepErrorKind::Clarification);
        assert_eq!(e.message, "Clarification needed: which record?");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::provider("503", true).is_retryable());
        assert!(!AppError::provider("bad request", false).is_retryable());
        assert!(AppError::Timeout("slow".into()).is_retryable());
        assert!(!AppError::InvalidInput("x".into()).is_retryable());
    }

    #[test]
    fn test_render_markdown_lists_failed_agents() {
        let response = Response {
            request_id: Uuid::new_v4(),
            conversation_id: "c1".into(),
            status: ResponseStatus::PartialSuccess,
            sections: vec![Section {
                agent_id: "query-1".into(),
                domain: Domain::Query,
                content: "42 units".into(),
                provenance: Provenance::default(),
            }],
            diagnostics: Diagnostics {
                results: vec![
                    AgentResult::success(0, Domain::Query, "query-1", AgentOutput::text("42 units"), 1),
                    AgentResult::timeout(1, Domain::Analytics, Some("analytics-1".into()), 30_000),
                ],
                ..Default::default()
            },
        };

        let md = response.render_markdown();
        assert!(md.contains("**Query Agent Response**"));
        assert!(md.contains("analytics-1 (analytics)"));
    }

    #[test]
    fn test_render_markdown_asks_for_missing_detail() {
        let response = Response {
            request_id: Uuid::new_v4(),
            conversation_id: "c1".into(),
            status: ResponseStatus::Failed,
            sections: Vec::new(),
            diagnostics: Diagnostics {
                results: vec![AgentResult::failure(
                    0,
                    Domain::Action,
                    Some("action-1".into()),
                    AppError::Clarification("Which record should be deleted?".into()).into(),
                    0,
                )],
                ..Default::default()
            },
        };

        let md = response.render_markdown();
        assert!(md.starts_with("Clarification needed: Which record should be deleted?"));
        assert!(md.contains("action-1 (action)"));
    }
}
