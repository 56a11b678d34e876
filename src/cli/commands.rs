//! Offline subcommands: `check`, `route` and `agents`.
//!
//! None of these contact a model provider or ERP gateway. `route` plans
//! against a registry built from the configured agents, all assumed healthy,
//! using the keyword classifier.

use super::output::Output;
use crate::agents::registry::RegistrySnapshot;
use crate::agents::router::KeywordClassifier;
use crate::memory::ConversationContext;
use crate::types::{AgentDescriptor, AppError, Intent, Result};
use crate::utils::toml_config::{ClassifierKind, ConfigWarningKind, CopilotConfig};
use crate::workflows::{ExecutionPlan, RoutingEngine, StepTarget};
use std::path::Path;

fn load(path: &Path) -> Result<CopilotConfig> {
    CopilotConfig::load(path).map_err(|e| AppError::Configuration(e.to_string()))
}

/// Validate the configuration; warnings are printed but do not fail the check.
pub fn check(path: &Path, output: &Output) -> Result<()> {
    output.header(&format!("Checking {}", path.display()));

    let config = load(path)?;
    let warnings = config
        .validate_with_warnings()
        .map_err(|e| AppError::Configuration(e.to_string()))?;

    output.kv("agents", &config.enabled_agents().count().to_string());
    output.kv("providers", &config.providers.len().to_string());
    output.kv("connectors", &config.connectors.len().to_string());
    output.kv("dependency rules", &config.routing.dependencies.len().to_string());

    for warning in &warnings {
        output.warning(&warning.message);
    }
    if warnings
        .iter()
        .any(|w| w.kind == ConfigWarningKind::UncoveredDomain)
    {
        output.hint("Requests for uncovered domains end with a planning failure");
    }

    output.success(&format!(
        "Configuration is valid ({} warning{})",
        warnings.len(),
        if warnings.len() == 1 { "" } else { "s" }
    ));
    Ok(())
}

/// Registry snapshot holding one healthy descriptor per enabled agent.
pub fn configured_snapshot(config: &CopilotConfig) -> RegistrySnapshot {
    RegistrySnapshot::from_descriptors(
        config
            .enabled_agents()
            .map(|(id, agent)| AgentDescriptor::new(id.clone(), vec![agent.domain])),
    )
}

/// Classify `text` with the keyword classifier and plan it against the
/// configured agents.
pub fn plan_utterance(config: &CopilotConfig, text: &str) -> Result<(Vec<Intent>, ExecutionPlan)> {
    let classifier = KeywordClassifier::new(config.classifier.confidence_floor);
    let intents = classifier.classify_text(text, &ConversationContext::new("cli"));
    let engine = RoutingEngine::new(
        config.routing.dominance_margin,
        config.routing.dependencies.clone(),
    )?;
    let plan = engine.plan(&intents, &configured_snapshot(config))?;
    Ok((intents, plan))
}

pub fn route(path: &Path, text: &str, output: &Output) -> Result<()> {
    let config = load(path)?;
    if config.classifier.kind == ClassifierKind::Model {
        output.info("Planning with the keyword classifier; the model classifier is only used at runtime");
    }

    let (intents, plan) = plan_utterance(&config, text)?;

    output.header("Intents");
    for intent in &intents {
        let slots: Vec<String> = intent
            .extracted_slots
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let mut line = format!("{} ({:.2})", intent.domain, intent.confidence);
        if !slots.is_empty() {
            line.push_str(&format!(" [{}]", slots.join(", ")));
        }
        output.list_item(&line);
    }

    output.header("Execution Plan");
    let widths = [4, 12, 20, 10];
    output.table_header(&["Step", "Domain", "Target", "Mode", "Depends on"], &widths);
    for step in plan.steps() {
        let target = match &step.target {
            StepTarget::Agent(id) => id.clone(),
            StepTarget::Unroutable { reason } => format!("unroutable: {}", reason),
        };
        let depends: Vec<String> = step.depends_on.iter().map(|d| d.to_string()).collect();
        let mode = format!("{:?}", step.mode).to_lowercase();
        output.table_row(
            &[
                &step.step_id.to_string(),
                step.domain.as_str(),
                &target,
                &mode,
                &depends.join(","),
            ],
            &widths,
        );
    }

    if plan.routable_count() == 0 {
        output.warning("No step can be routed; this request would fail planning");
    }
    Ok(())
}

pub fn agents(path: &Path, output: &Output) -> Result<()> {
    let config = load(path)?;

    output.header("Agents");
    let widths = [16, 12, 24, 16];
    output.table_header(&["Name", "Domain", "Backend", "Model", "Status"], &widths);
    for (name, agent) in &config.agents {
        let backend = match (&agent.provider, &agent.connector) {
            (Some(p), _) => format!("provider:{}", p),
            (None, Some(c)) => format!("connector:{}", c),
            (None, None) => "-".to_string(),
        };
        let model = config.agent_model(agent).unwrap_or_else(|| "-".to_string());
        let status = if agent.enabled { "enabled" } else { "disabled" };
        output.table_row(
            &[name, agent.domain.as_str(), &backend, &model, status],
            &widths,
        );
    }
    if config.agents.is_empty() {
        output.hint("No agents configured; add [agents.<name>] sections to the config file");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Domain;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[providers.local]
type = "ollama"
default_model = "llama3.2"

[connectors.erp]
base_url = "http://localhost:9000"

[agents.query]
domain = "query"
provider = "local"

[agents.action]
domain = "action"
connector = "erp"

[agents.compliance]
domain = "compliance"
connector = "erp"
"#;

    fn config() -> CopilotConfig {
        CopilotConfig::from_toml_str(CONFIG).unwrap()
    }

    #[test]
    fn test_snapshot_covers_enabled_agents() {
        let snapshot = configured_snapshot(&config());
        assert_eq!(snapshot.list(Domain::Query).len(), 1);
        assert_eq!(snapshot.list(Domain::Action)[0].agent_id, "action");
        assert!(snapshot.list(Domain::Help).is_empty());
    }

    #[test]
    fn test_plan_single_query() {
        let (intents, plan) = plan_utterance(&config(), "show inventory for SKU-42").unwrap();

        assert_eq!(intents[0].domain, Domain::Query);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps()[0].agent_id(), Some("query"));
    }

    #[test]
    fn test_unserved_domain_is_unroutable() {
        let (_, plan) = plan_utterance(&config(), "how do I reset my password").unwrap();
        assert_eq!(plan.routable_count(), 0);
    }

    #[test]
    fn test_commands_against_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("copilot.toml");
        fs::write(&path, CONFIG).unwrap();
        let output = Output::no_color();

        check(&path, &output).unwrap();
        route(&path, "update employee EMP-5 and confirm compliance", &output).unwrap();
        agents(&path, &output).unwrap();
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let err = check(&dir.path().join("absent.toml"), &Output::no_color()).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
