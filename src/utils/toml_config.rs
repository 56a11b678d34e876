//! TOML-based configuration for the copilot
//!
//! This module provides declarative configuration for timeouts, classifier
//! and routing parameters, health probing, providers, ERP connectors, agents
//! and authorization via a TOML file (`copilot.toml`).
//!
//! # Hot Reloading
//!
//! Configuration changes are automatically detected and applied at runtime.
//! Use `CopilotConfigManager` for thread-safe access to the current configuration.

use crate::agents::health::HealthMonitorConfig;
use crate::auth::{DefaultDecision, PolicyRule};
use crate::rag::KnowledgeDocument;
use crate::types::Domain;
use crate::utils::retry::RetryPolicy;
use crate::workflows::plan::{
    default_dependency_rules, find_rule_cycle, DependencyRule, DEFAULT_DOMINANCE_MARGIN,
};
use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Root configuration structure loaded from copilot.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopilotConfig {
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub context: ContextConfig,

    /// Retry policy applied to every provider and connector adapter
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Named model provider configurations
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Named ERP connector configurations
    #[serde(default)]
    pub connectors: BTreeMap<String, ConnectorConfig>,

    /// Agent instances, keyed by agent id
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,

    #[serde(default)]
    pub authorization: AuthorizationConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

// ============= Telemetry =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

// ============= Orchestrator =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_step_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl OrchestratorConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============= Classifier =============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Keyword,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub kind: ClassifierKind,

    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,

    /// Provider used when `kind = "model"`
    #[serde(default)]
    pub provider: Option<String>,

    /// Overrides the provider's default model
    #[serde(default)]
    pub model: Option<String>,
}

fn default_confidence_floor() -> f32 {
    crate::agents::router::DEFAULT_CONFIDENCE_FLOOR
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::Keyword,
            confidence_floor: default_confidence_floor(),
            provider: None,
            model: None,
        }
    }
}

// ============= Routing =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Confidence lead that makes the top intent a single-step plan
    #[serde(default = "default_dominance_margin")]
    pub dominance_margin: f32,

    #[serde(default = "default_dependency_rules")]
    pub dependencies: Vec<DependencyRule>,
}

fn default_dominance_margin() -> f32 {
    DEFAULT_DOMINANCE_MARGIN
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            dominance_margin: default_dominance_margin(),
            dependencies: default_dependency_rules(),
        }
    }
}

// ============= Health =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Successful probes slower than this mark the agent Degraded
    #[serde(default = "default_degraded_latency_ms")]
    pub degraded_latency_ms: u64,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_degraded_latency_ms() -> u64 {
    2000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            degraded_latency_ms: default_degraded_latency_ms(),
        }
    }
}

impl HealthConfig {
    pub fn monitor_config(&self) -> HealthMonitorConfig {
        HealthMonitorConfig {
            interval: Duration::from_secs(self.interval_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            failure_threshold: self.failure_threshold,
            degraded_latency: Duration::from_millis(self.degraded_latency_ms),
        }
    }
}

// ============= Context =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Lifetime of remembered slots; unset keeps them for the conversation
    #[serde(default)]
    pub slot_ttl_secs: Option<u64>,

    /// Conversations untouched this long are dropped; 0 keeps them forever
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

fn default_max_turns() -> usize {
    crate::memory::DEFAULT_MAX_TURNS
}

fn default_idle_ttl_secs() -> u64 {
    3600
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            slot_ttl_secs: None,
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

impl ContextConfig {
    pub fn slot_ttl(&self) -> Option<Duration> {
        self.slot_ttl_secs.map(Duration::from_secs)
    }

    pub fn idle_ttl(&self) -> Option<Duration> {
        (self.idle_ttl_secs > 0).then(|| Duration::from_secs(self.idle_ttl_secs))
    }
}

// ============= Providers & Connectors =============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
        default_model: String,
    },
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

impl ProviderConfig {
    pub fn default_model(&self) -> &str {
        match self {
            ProviderConfig::Ollama { default_model, .. } => default_model,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub base_url: String,

    /// Environment variable holding the bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_connector_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_connector_timeout_secs() -> u64 {
    10
}

// ============= Agents =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub domain: Domain,

    /// Required by query, analytics and help agents
    #[serde(default)]
    pub provider: Option<String>,

    /// Overrides the provider's default model
    #[serde(default)]
    pub model: Option<String>,

    /// Required by action, scheduler and compliance agents
    #[serde(default)]
    pub connector: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Whether agents of `domain` talk to the model rather than the ERP.
pub fn domain_uses_model(domain: Domain) -> bool {
    matches!(domain, Domain::Query | Domain::Analytics | Domain::Help)
}

// ============= Authorization & Knowledge =============

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(default)]
    pub default_decision: DefaultDecision,

    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Text files loaded as documents; the path is the citation
    #[serde(default)]
    pub files: Vec<PathBuf>,

    #[serde(default)]
    pub documents: Vec<KnowledgeDocument>,
}

fn default_max_results() -> usize {
    5
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            files: Vec::new(),
            documents: Vec::new(),
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Configuration warnings that don't prevent operation but may indicate issues
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub kind: ConfigWarningKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarningKind {
    UncoveredDomain,
    UnusedProvider,
    UnusedConnector,
    DisabledAgent,
    StepTimeoutExceedsRequest,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),

    #[error("Provider '{0}' referenced by '{1}' does not exist")]
    MissingProvider(String, String),

    #[error("Connector '{0}' referenced by agent '{1}' does not exist")]
    MissingConnector(String, String),

    #[error("Circular reference detected: {0}")]
    CircularReference(String),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

impl CopilotConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CopilotConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate ranges, references, dependency cycles and env var availability
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.step_timeout_secs == 0 || self.orchestrator.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator timeouts must be greater than zero".to_string(),
            ));
        }

        let floor = self.classifier.confidence_floor;
        if !(floor > 0.0 && floor <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "classifier.confidence_floor must be in (0, 1], got {}",
                floor
            )));
        }

        let margin = self.routing.dominance_margin;
        if !(0.0..=1.0).contains(&margin) {
            return Err(ConfigError::ValidationError(format!(
                "routing.dominance_margin must be in [0, 1], got {}",
                margin
            )));
        }

        if self.health.failure_threshold == 0 || self.health.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "health.failure_threshold and health.interval_secs must be at least 1".to_string(),
            ));
        }

        if self.context.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_turns must be at least 1".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.classifier.kind == ClassifierKind::Model {
            let provider = self.classifier.provider.as_deref().ok_or_else(|| {
                ConfigError::ValidationError(
                    "classifier.kind = \"model\" requires classifier.provider".to_string(),
                )
            })?;
            if !self.providers.contains_key(provider) {
                return Err(ConfigError::MissingProvider(
                    provider.to_string(),
                    "classifier".to_string(),
                ));
            }
        }

        for (name, connector) in &self.connectors {
            if !connector.base_url.starts_with("http://") && !connector.base_url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "connector '{}' base_url must be an http(s) URL",
                    name
                )));
            }
            if let Some(ref env) = connector.api_key_env {
                self.validate_env_var(env)?;
            }
        }

        for (name, agent) in &self.agents {
            if let Some(ref provider) = agent.provider {
                if !self.providers.contains_key(provider) {
                    return Err(ConfigError::MissingProvider(provider.clone(), name.clone()));
                }
            }
            if let Some(ref connector) = agent.connector {
                if !self.connectors.contains_key(connector) {
                    return Err(ConfigError::MissingConnector(connector.clone(), name.clone()));
                }
            }
            if domain_uses_model(agent.domain) && agent.provider.is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{}' ({}) requires a provider",
                    name, agent.domain
                )));
            }
            if !domain_uses_model(agent.domain) && agent.connector.is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{}' ({}) requires a connector",
                    name, agent.domain
                )));
            }
        }

        self.detect_circular_references()?;

        Ok(())
    }

    /// Reject dependency rules that form a cycle
    fn detect_circular_references(&self) -> Result<(), ConfigError> {
        if let Some(cycle) = find_rule_cycle(&self.routing.dependencies) {
            let names: Vec<&str> = cycle.iter().map(Domain::as_str).collect();
            return Err(ConfigError::CircularReference(format!(
                "routing dependencies form a cycle: {}",
                names.join(" -> ")
            )));
        }
        Ok(())
    }

    /// Validate configuration with warnings for gaps and unused items
    ///
    /// Returns Ok with warnings, or Err if validation fails
    pub fn validate_with_warnings(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        self.validate()?;

        let mut warnings = Vec::new();
        warnings.extend(self.check_uncovered_domains());
        warnings.extend(self.check_unused_providers());
        warnings.extend(self.check_unused_connectors());
        warnings.extend(self.check_disabled_agents());

        if self.orchestrator.step_timeout_secs > self.orchestrator.request_timeout_secs {
            warnings.push(ConfigWarning {
                kind: ConfigWarningKind::StepTimeoutExceedsRequest,
                message: format!(
                    "Step timeout ({}s) exceeds the request timeout ({}s); steps will be cut off by the request deadline",
                    self.orchestrator.step_timeout_secs, self.orchestrator.request_timeout_secs
                ),
            });
        }

        Ok(warnings)
    }

    /// Domains no enabled agent serves; requests for them fail planning
    fn check_uncovered_domains(&self) -> Vec<ConfigWarning> {
        let covered: BTreeSet<Domain> = self
            .enabled_agents()
            .map(|(_, agent)| agent.domain)
            .collect();

        Domain::ALL
            .iter()
            .filter(|d| !covered.contains(d))
            .map(|d| ConfigWarning {
                kind: ConfigWarningKind::UncoveredDomain,
                message: format!("No enabled agent serves the '{}' domain", d),
            })
            .collect()
    }

    fn check_unused_providers(&self) -> Vec<ConfigWarning> {
        let mut referenced: HashSet<&str> = self
            .agents
            .values()
            .filter_map(|a| a.provider.as_deref())
            .collect();
        if let Some(ref p) = self.classifier.provider {
            referenced.insert(p.as_str());
        }

        self.providers
            .keys()
            .filter(|name| !referenced.contains(name.as_str()))
            .map(|name| ConfigWarning {
                kind: ConfigWarningKind::UnusedProvider,
                message: format!(
                    "Provider '{}' is defined but not referenced by any agent or the classifier",
                    name
                ),
            })
            .collect()
    }

    fn check_unused_connectors(&self) -> Vec<ConfigWarning> {
        let referenced: HashSet<&str> = self
            .agents
            .values()
            .filter_map(|a| a.connector.as_deref())
            .collect();

        self.connectors
            .keys()
            .filter(|name| !referenced.contains(name.as_str()))
            .map(|name| ConfigWarning {
                kind: ConfigWarningKind::UnusedConnector,
                message: format!("Connector '{}' is defined but not referenced by any agent", name),
            })
            .collect()
    }

    fn check_disabled_agents(&self) -> Vec<ConfigWarning> {
        self.agents
            .iter()
            .filter(|(_, a)| !a.enabled)
            .map(|(name, _)| ConfigWarning {
                kind: ConfigWarningKind::DisabledAgent,
                message: format!("Agent '{}' is disabled and will not be registered", name),
            })
            .collect()
    }

    fn validate_env_var(&self, name: &str) -> Result<(), ConfigError> {
        std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))?;
        Ok(())
    }

    /// Get a resolved value from an env var reference
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok()
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    pub fn get_connector(&self, name: &str) -> Option<&ConnectorConfig> {
        self.connectors.get(name)
    }

    pub fn get_agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.get(name)
    }

    /// Enabled agents in id order
    pub fn enabled_agents(&self) -> impl Iterator<Item = (&String, &AgentConfig)> {
        self.agents.iter().filter(|(_, a)| a.enabled)
    }

    /// Model an agent uses: its override, else its provider's default
    pub fn agent_model(&self, agent: &AgentConfig) -> Option<String> {
        agent.model.clone().or_else(|| {
            agent
                .provider
                .as_deref()
                .and_then(|p| self.providers.get(p))
                .map(|p| p.default_model().to_string())
        })
    }

    /// Inline documents plus the configured files, read from disk
    pub fn knowledge_documents(&self) -> Result<Vec<KnowledgeDocument>, ConfigError> {
        let mut documents = self.knowledge.documents.clone();
        for path in &self.knowledge.files {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            let content = fs::read_to_string(path)?;
            let id = path.display().to_string();
            documents.push(KnowledgeDocument::new(id.clone(), content, id));
        }
        Ok(documents)
    }
}

// ============= Hot Reloading Configuration Manager =============

/// Thread-safe configuration manager with hot reloading support
pub struct CopilotConfigManager {
    config: Arc<ArcSwap<CopilotConfig>>,
    config_path: PathBuf,
    watcher: RwLock<Option<RecommendedWatcher>>,
    reload_tx: Option<mpsc::UnboundedSender<()>>,
}

impl CopilotConfigManager {
    /// Create a new configuration manager and load the initial config
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        // Convert to absolute path for reliable file watching
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let config = CopilotConfig::load(&path)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: path,
            watcher: RwLock::new(None),
            reload_tx: None,
        })
    }

    /// Create a config manager directly from a config, without file watching
    pub fn from_config(config: CopilotConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: PathBuf::from("copilot.toml"),
            watcher: RwLock::new(None),
            reload_tx: None,
        }
    }

    /// Get the current configuration (lockless read)
    pub fn config(&self) -> Arc<CopilotConfig> {
        self.config.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Manually reload the configuration from disk
    ///
    /// The previous configuration stays active when the new one is invalid.
    pub fn reload(&self) -> Result<(), ConfigError> {
        info!(path = %self.config_path.display(), "reloading configuration");

        let new_config = CopilotConfig::load(&self.config_path)?;
        self.config.store(Arc::new(new_config));

        info!("configuration reloaded");
        Ok(())
    }

    /// Start watching for configuration file changes
    pub fn start_watching(&mut self) -> Result<(), ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        self.reload_tx = Some(tx.clone());

        let config_path = self.config_path.clone();
        let config_arc = Arc::clone(&self.config);
        let file_name = self.config_path.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let touches_config = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if touches_config && (event.kind.is_modify() || event.kind.is_create()) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    error!(error = ?e, "config watcher error");
                }
            }
        })?;

        // Watch the config file's parent directory
        if let Some(parent) = self.config_path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        *self.watcher.write() = Some(watcher);

        tokio::spawn(async move {
            let debounce = Duration::from_millis(500);

            while rx.recv().await.is_some() {
                // Wait for the write burst to settle, then drain queued signals
                tokio::time::sleep(debounce).await;
                while rx.try_recv().is_ok() {}

                match CopilotConfig::load(&config_path) {
                    Ok(new_config) => {
                        config_arc.store(Arc::new(new_config));
                        info!("configuration hot-reloaded");
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to hot-reload config, keeping previous config");
                    }
                }
            }
        });

        info!("configuration hot-reload watcher started");
        Ok(())
    }

    /// Stop watching for configuration changes
    pub fn stop_watching(&self) {
        *self.watcher.write() = None;
        info!("configuration hot-reload watcher stopped");
    }
}

impl Clone for CopilotConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            config_path: self.config_path.clone(),
            watcher: RwLock::new(None), // Watcher is not cloned
            reload_tx: self.reload_tx.clone(),
        }
    }
}
