//! Model provider contract and provider selection
//!
//! Agents consult the language model through [`ModelProvider`]. Inference
//! itself happens elsewhere; this crate only ships adapters.

use crate::types::{AppError, MessageRole, Result};
use crate::utils::retry::RetryPolicy;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

/// A chat message sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters forwarded to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationParams {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Stream of generated text chunks.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Generic model provider trait
///
/// Errors surface as [`AppError::Provider`]; `retryable` tells wrappers such
/// as [`RetryingProvider`] whether another attempt may succeed.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Generate a completion for the conversation in `messages`.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &GenerationParams,
    ) -> Result<String>;

    /// Stream a completion. Providers without native streaming yield the
    /// whole completion as a single chunk.
    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream> {
        let text = self.generate(messages, model, params).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }

    /// Cheap reachability probe.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    /// Model used when the caller does not name one.
    fn default_model(&self) -> &str;
}

/// Wraps a provider with bounded exponential-backoff retry of retryable errors.
pub struct RetryingProvider {
    inner: Arc<dyn ModelProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn ModelProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ModelProvider for RetryingProvider {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &GenerationParams,
    ) -> Result<String> {
        self.policy
            .run(
                || self.inner.generate(messages, model, params),
                AppError::is_retryable,
            )
            .await
    }

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream> {
        self.policy
            .run(
                || self.inner.generate_stream(messages, model, params),
                AppError::is_retryable,
            )
            .await
    }

    async fn health_check(&self) -> Result<()> {
        self.inner.health_check().await
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }
}

/// Provider selection for runtime construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Provider {
    /// Ollama local inference server.
    Ollama { base_url: String, model: String },
}

impl Provider {
    /// Create a client for this provider.
    ///
    /// # Errors
    ///
    /// Returns a non-retryable provider error when the adapter was not
    /// compiled in.
    pub async fn create_client(&self) -> Result<Arc<dyn ModelProvider>> {
        match self {
            #[cfg(feature = "ollama")]
            Provider::Ollama { base_url, model } => Ok(Arc::new(
                super::ollama::OllamaClient::new(base_url.clone(), model.clone())?,
            )),
            #[cfg(not(feature = "ollama"))]
            Provider::Ollama { .. } => Err(AppError::provider(
                "Ollama support not compiled in; enable the `ollama` feature",
                false,
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Ollama { .. } => "Ollama",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        calls: AtomicU32,
        fail_times: u32,
        retryable: bool,
    }

    #[async_trait]
    impl ModelProvider for FlakyProvider {
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _model: &str,
            _params: &GenerationParams,
        ) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(AppError::provider("overloaded", self.retryable))
            } else {
                Ok("done".to_string())
            }
        }

        fn default_model(&self) -> &str {
            "flaky"
        }
    }

    fn flaky(fail_times: u32, retryable: bool) -> Arc<FlakyProvider> {
        Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            fail_times,
            retryable,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_provider_recovers_from_transient_errors() {
        let inner = flaky(2, true);
        let provider = RetryingProvider::new(inner.clone(), RetryPolicy::default());

        let out = provider
            .generate(&[ChatMessage::user("hi")], "m", &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(out, "done");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_provider_does_not_retry_fatal_errors() {
        let inner = flaky(5, false);
        let provider = RetryingProvider::new(inner.clone(), RetryPolicy::default());

        let err = provider
            .generate(&[ChatMessage::user("hi")], "m", &GenerationParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Provider { retryable: false, .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_stream_yields_single_chunk() {
        use futures::StreamExt;

        let provider = flaky(0, true);
        let chunks: Vec<String> = provider
            .generate_stream(&[ChatMessage::user("hi")], "m", &GenerationParams::default())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks, vec!["done".to_string()]);
    }

    #[test]
    fn test_provider_name() {
        let provider = Provider::Ollama {
            base_url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
        };
        assert_eq!(provider.name(), "Ollama");
    }
}
