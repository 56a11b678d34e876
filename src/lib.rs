//! # Copilot - multi-agent ERP assistant orchestrator
//!
//! Accepts a natural-language utterance from an authenticated ERP user,
//! classifies its intent, routes it to one or more specialized agents under
//! health, authorization and deadline constraints, and synthesizes their
//! partial results into one response.
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use copilot::{Copilot, Principal};
//! use copilot::agents::QueryAgent;
//! use std::sync::Arc;
//!
//! let copilot = Copilot::builder()
//!     .agent(Arc::new(QueryAgent::new("query-1", knowledge, provider, "llama3.2")))
//!     .build();
//!
//! let principal = Principal::new("u-17", "acme").with_role("warehouse");
//! let response = copilot.handle("show inventory for SKU-42", "conv-1", &principal).await;
//! println!("{}", response.render_markdown());
//! ```
//!
//! ### Configuration-Driven Setup
//!
//! ```rust,ignore
//! use copilot::{Copilot, CopilotConfigManager};
//!
//! let manager = CopilotConfigManager::new("copilot.toml")?;
//! let copilot = Copilot::from_config(&manager.config()).await?;
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ollama` | Ollama model provider (default) |
//! | `minimal` | No model provider adapters |
//!
//! ## Modules
//!
//! - [`agents`] - Agent contract, specialized agents, registry, health, orchestrator
//! - [`workflows`] - Routing engine, step dispatcher and result synthesis
//! - [`memory`] - Per-conversation short-term context
//! - [`llm`] - Model provider contract and adapters
//! - [`rag`] - Knowledge retrieval contract and BM25 implementation
//! - [`connectors`] - ERP connector contract and HTTP adapter
//! - [`auth`] - Authorization of state-changing steps
//! - [`types`] - Domain types and error handling

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Agents, capability registry, health monitoring and the orchestrator.
pub mod agents;
/// Authorization for action-class steps.
pub mod auth;
/// Command-line interface for the copilot-server binary.
pub mod cli;
/// ERP connectors.
pub mod connectors;
/// Model provider clients and abstractions.
pub mod llm;
/// Conversation memory and context management.
pub mod memory;
/// Knowledge retrieval.
pub mod rag;
/// Core types (requests, responses, errors).
pub mod types;
/// Configuration and retry utilities.
pub mod utils;
/// Planning, dispatch and synthesis.
pub mod workflows;

// Re-export commonly used types
pub use agents::{Agent, CapabilityRegistry, Copilot, CopilotBuilder, OrchestratorStats};
pub use llm::{ModelProvider, Provider};
pub use types::{AppError, Domain, Principal, Response, ResponseStatus, Result};
pub use utils::toml_config::{CopilotConfig, CopilotConfigManager};
pub use workflows::{ExecutionPlan, RoutingEngine};
