/// Bounded exponential-backoff retry for provider and connector adapters.
pub mod retry;
/// TOML configuration (`copilot.toml`) with hot reload.
pub mod toml_config;
