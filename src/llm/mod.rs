//! Model provider clients and abstractions
//!
//! - [`ModelProvider`] - the contract every provider adapter implements
//! - [`RetryingProvider`] - bounded-retry wrapper used for every configured provider
//! - [`Provider`] - runtime provider selection from configuration
//!
//! Enable adapters via Cargo features:
//! - `ollama` - Local Ollama server (default)

/// Core provider trait, chat message types and retry wrapper.
pub mod client;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use client::{ChatMessage, GenerationParams, ModelProvider, Provider, RetryingProvider, TokenStream};
