//! Init command implementation
//!
//! Scaffolds a copilot.toml with every section documented, plus `.env.example`
//! and `.gitignore`.

use super::output::Output;
use std::fs;
use std::path::{Path, PathBuf};

/// Result of the init operation
pub enum InitResult {
    /// Initialization completed successfully
    Success,
    /// copilot.toml already exists
    AlreadyExists,
    /// An error occurred during initialization
    Error(String),
}

/// Configuration for the init command
pub struct InitConfig {
    /// Directory to initialize
    pub path: PathBuf,
    /// Overwrite existing files
    pub force: bool,
    /// Only configure model-backed agents
    pub minimal: bool,
}

/// Run the init command
pub fn run(config: InitConfig, output: &Output) -> InitResult {
    output.banner();
    output.header("Initializing ERP Copilot");

    let base_path = &config.path;
    if !base_path.exists() {
        if let Err(e) = fs::create_dir_all(base_path) {
            output.error(&format!("Failed to create {}: {}", base_path.display(), e));
            return InitResult::Error(e.to_string());
        }
    }

    let config_path = base_path.join("copilot.toml");
    if config_path.exists() && !config.force {
        output.warning("copilot.toml already exists!");
        output.hint("Use --force to overwrite existing files");
        return InitResult::AlreadyExists;
    }

    if let Err(e) = write_file(&config_path, &generate_copilot_toml(&config), config.force) {
        output.error(&format!("Failed to create copilot.toml: {}", e));
        return InitResult::Error(e.to_string());
    }
    output.created("config", "copilot.toml");

    let env_example_path = base_path.join(".env.example");
    if let Err(e) = write_file(&env_example_path, generate_env_example(), config.force) {
        output.error(&format!("Failed to create .env.example: {}", e));
        return InitResult::Error(e.to_string());
    }
    output.created("env", ".env.example");

    let gitignore_path = base_path.join(".gitignore");
    if gitignore_path.exists() {
        output.skipped(".gitignore", "already exists");
    } else if let Err(e) = write_file(&gitignore_path, generate_gitignore(), false) {
        output.warning(&format!("Failed to create .gitignore: {}", e));
    } else {
        output.created("file", ".gitignore");
    }

    output.success("Copilot configuration initialized");

    output.header("Next Steps");
    output.info("1. Start Ollama (if not running):");
    output.command("ollama serve");
    output.command("ollama pull llama3.2");
    if !config.minimal {
        output.info("2. Point [connectors.erp] at your ERP gateway and set ERP_API_KEY in .env");
    }
    output.info("3. Validate and try a request:");
    output.command("copilot-server check");
    output.command("copilot-server route \"show inventory for SKU-42\"");
    output.hint("Run copilot-server without a subcommand to start an interactive session");

    InitResult::Success
}

fn write_file(path: &Path, content: &str, force: bool) -> std::io::Result<()> {
    if path.exists() && !force {
        return Ok(());
    }
    fs::write(path, content)
}

fn generate_copilot_toml(config: &InitConfig) -> String {
    let mut toml = String::from(
        r#"# ERP Copilot configuration
# Reloaded automatically when this file changes.

[telemetry]
# Overridden by RUST_LOG when set
log_level = "info"
json = false

[orchestrator]
step_timeout_secs = 30
request_timeout_secs = 60

[classifier]
# "keyword" (no model call) or "model" (requires provider)
kind = "keyword"
confidence_floor = 0.4

[routing]
# Secondary intents within this margin of the top score are planned as well
dominance_margin = 0.25

[health]
interval_secs = 30
probe_timeout_secs = 5
failure_threshold = 3
degraded_latency_ms = 2000

[context]
max_turns = 20
slot_ttl_secs = 1800
idle_ttl_secs = 3600

[retry]
max_attempts = 3
initial_delay_ms = 200
max_delay_ms = 5000
multiplier = 2.0

# ============= Model Providers =============

[providers.ollama-local]
type = "ollama"
base_url = "http://localhost:11434"
default_model = "llama3.2"
"#,
    );

    if !config.minimal {
        toml.push_str(
            r#"
# ============= ERP Connectors =============

[connectors.erp]
base_url = "http://localhost:9000"
timeout_secs = 10
# api_key_env = "ERP_API_KEY"
"#,
        );
    }

    toml.push_str(
        r#"
# ============= Agents =============

[agents.query]
domain = "query"
provider = "ollama-local"

[agents.analytics]
domain = "analytics"
provider = "ollama-local"

[agents.help]
domain = "help"
provider = "ollama-local"
"#,
    );

    if !config.minimal {
        toml.push_str(
            r#"
[agents.action]
domain = "action"
connector = "erp"

[agents.scheduler]
domain = "scheduler"
connector = "erp"

[agents.compliance]
domain = "compliance"
connector = "erp"

# ============= Authorization =============
# Applies to action and scheduler steps only.

[authorization]
default_decision = "deny"

[[authorization.rules]]
role = "erp-admin"

[[authorization.rules]]
role = "hr-manager"
actions = ["update", "create"]
resources = ["employee*"]

[[authorization.rules]]
role = "planner"
actions = ["schedule"]
"#,
        );
    }

    toml.push_str(
        r#"
# ============= Knowledge =============

[knowledge]
max_results = 5
files = []

[[knowledge.documents]]
id = "getting-started"
content = "Ask about inventory, orders or employees; request updates; schedule reports; run compliance checks."
source = "handbook/getting-started.md"
"#,
    );

    toml
}

fn generate_env_example() -> &'static str {
    r#"# Copy to .env and fill in values

# Log filter, overrides [telemetry].log_level
RUST_LOG=info

# API key sent to the ERP gateway when [connectors.erp].api_key_env is set
ERP_API_KEY=
"#
}

fn generate_gitignore() -> &'static str {
    r#"# Environment
.env

# Rust
/target/
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Domain;
    use crate::utils::toml_config::CopilotConfig;
    use tempfile::TempDir;

    fn init_config(dir: &TempDir, minimal: bool, force: bool) -> InitConfig {
        InitConfig {
            path: dir.path().to_path_buf(),
            force,
            minimal,
        }
    }

    #[test]
    fn test_generated_config_is_valid() {
        let dir = TempDir::new().unwrap();
        let toml = generate_copilot_toml(&init_config(&dir, false, false));

        let config = CopilotConfig::from_toml_str(&toml).unwrap();
        let warnings = config.validate_with_warnings().unwrap();

        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
        assert_eq!(config.enabled_agents().count(), 6);
        assert_eq!(config.authorization.rules.len(), 3);
    }

    #[test]
    fn test_minimal_config_has_no_connectors() {
        let dir = TempDir::new().unwrap();
        let toml = generate_copilot_toml(&init_config(&dir, true, false));

        let config = CopilotConfig::from_toml_str(&toml).unwrap();
        config.validate().unwrap();

        assert!(config.connectors.is_empty());
        let domains: Vec<Domain> = config.enabled_agents().map(|(_, a)| a.domain).collect();
        assert!(!domains.contains(&Domain::Action));
        assert_eq!(domains.len(), 3);
    }

    #[test]
    fn test_run_creates_files() {
        let dir = TempDir::new().unwrap();
        let result = run(init_config(&dir, false, false), &Output::no_color());

        assert!(matches!(result, InitResult::Success));
        assert!(dir.path().join("copilot.toml").exists());
        assert!(dir.path().join(".env.example").exists());
        assert!(dir.path().join(".gitignore").exists());
    }

    #[test]
    fn test_run_refuses_to_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("copilot.toml"), "# mine").unwrap();

        let result = run(init_config(&dir, false, false), &Output::no_color());
        assert!(matches!(result, InitResult::AlreadyExists));
        assert_eq!(
            fs::read_to_string(dir.path().join("copilot.toml")).unwrap(),
            "# mine"
        );

        let result = run(init_config(&dir, false, true), &Output::no_color());
        assert!(matches!(result, InitResult::Success));
        assert!(fs::read_to_string(dir.path().join("copilot.toml"))
            .unwrap()
            .contains("[orchestrator]"));
    }

    #[test]
    fn test_existing_gitignore_is_kept() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "custom\n").unwrap();

        run(init_config(&dir, false, true), &Output::no_color());

        assert_eq!(
            fs::read_to_string(dir.path().join(".gitignore")).unwrap(),
            "custom\n"
        );
    }
}
