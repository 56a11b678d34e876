//! Mock agents, classifiers and sinks shared by the integration tests.

use async_trait::async_trait;
use copilot::agents::{Agent, AgentTask, IntentClassifier, TranscriptSink};
use copilot::connectors::{AuthContext, ErpConnector};
use copilot::memory::ConversationContext;
use copilot::types::{AgentOutput, AppError, Domain, Intent, Result, Slots, Turn, Utterance};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// What a [`ScriptedAgent`] does when executed.
#[derive(Clone)]
pub enum Behavior {
    Reply(String),
    Fail(String),
    /// Sleep, then reply.
    Slow(Duration, String),
    Panic,
}

/// Agent with a fixed behavior that records every task it receives.
pub struct ScriptedAgent {
    id: String,
    domains: Vec<Domain>,
    behavior: Behavior,
    healthy: AtomicBool,
    calls: AtomicUsize,
    tasks: Mutex<Vec<AgentTask>>,
}

impl ScriptedAgent {
    pub fn new(id: &str, domain: Domain, behavior: Behavior) -> Self {
        Self {
            id: id.to_string(),
            domains: vec![domain],
            behavior,
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(id: &str, domain: Domain, reply: &str) -> Self {
        Self::new(id, domain, Behavior::Reply(reply.to_string()))
    }

    pub fn failing(id: &str, domain: Domain, message: &str) -> Self {
        Self::new(id, domain, Behavior::Fail(message.to_string()))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_task(&self) -> Option<AgentTask> {
        self.tasks.lock().last().cloned()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn agent_id(&self) -> &str {
        &self.id
    }

    fn domains(&self) -> Vec<Domain> {
        self.domains.clone()
    }

    async fn execute(&self, task: &AgentTask) -> Result<AgentOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().push(task.clone());
        match &self.behavior {
            Behavior::Reply(reply) => Ok(AgentOutput::text(reply.clone())),
            Behavior::Fail(message) => Err(AppError::AgentExecution(message.clone())),
            Behavior::Slow(delay, reply) => {
                tokio::time::sleep(*delay).await;
                Ok(AgentOutput::text(reply.clone()))
            }
            Behavior::Panic => panic!("scripted agent {} panicked", self.id),
        }
    }

    async fn health_check(&self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::AgentExecution(format!("{} is down", self.id)))
        }
    }
}

/// Classifier returning the same intents for every utterance.
pub struct FixedClassifier {
    intents: Vec<Intent>,
}

impl FixedClassifier {
    pub fn new(intents: &[(Domain, f32)]) -> Self {
        Self {
            intents: intents
                .iter()
                .map(|(domain, confidence)| Intent::new(*domain, *confidence))
                .collect(),
        }
    }

    /// Attach the same slots to every intent.
    pub fn with_slots(mut self, pairs: &[(&str, &str)]) -> Self {
        let slots: Slots = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for intent in &mut self.intents {
            intent.extracted_slots = slots.clone();
        }
        self
    }
}

#[async_trait]
impl IntentClassifier for FixedClassifier {
    async fn classify(
        &self,
        _utterance: &Utterance,
        _context: &ConversationContext,
    ) -> Result<Vec<Intent>> {
        Ok(self.intents.clone())
    }
}

/// Transcript sink keeping everything in memory, optionally failing or stalling.
#[derive(Default)]
pub struct RecordingSink {
    pub records: Mutex<Vec<(String, Vec<Turn>)>>,
    pub fail: bool,
    pub stall: Option<Duration>,
}

#[async_trait]
impl TranscriptSink for RecordingSink {
    async fn record(&self, conversation_id: &str, turns: &[Turn]) -> Result<()> {
        self.records
            .lock()
            .push((conversation_id.to_string(), turns.to_vec()));
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        if self.fail {
            return Err(AppError::Internal("transcript store offline".to_string()));
        }
        Ok(())
    }
}

/// ERP connector recording every operation it is asked to run.
#[derive(Default)]
pub struct RecordingConnector {
    pub operations: Mutex<Vec<String>>,
}

impl RecordingConnector {
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().clone()
    }
}

#[async_trait]
impl ErpConnector for RecordingConnector {
    async fn invoke(
        &self,
        operation: &str,
        _payload: serde_json::Value,
        _auth: &AuthContext,
    ) -> Result<serde_json::Value> {
        self.operations.lock().push(operation.to_string());
        Ok(serde_json::json!({ "message": format!("{} done.", operation) }))
    }

    fn name(&self) -> &str {
        "recording-erp"
    }
}
