use crate::llm::client::{ChatMessage, GenerationParams, ModelProvider, TokenStream};
use crate::types::{AppError, MessageRole, Result};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use ollama_rs::{
    generation::chat::{request::ChatMessageRequest, ChatMessage as OllamaMessage},
    models::ModelOptions,
    Ollama,
};

const DEFAULT_PORT: u16 = 11434;

pub struct OllamaClient {
    client: Ollama,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Result<Self> {
        let (host, port) = split_base_url(&base_url);
        let client = Ollama::new(host, port);
        Ok(Self { client, model })
    }

    fn request(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &GenerationParams,
    ) -> ChatMessageRequest {
        let model = if model.is_empty() { &self.model } else { model };
        let messages = messages.iter().map(to_ollama).collect();
        let mut request = ChatMessageRequest::new(model.to_string(), messages);

        if params.temperature.is_some() || params.max_tokens.is_some() {
            let mut options = ModelOptions::default();
            if let Some(t) = params.temperature {
                options = options.temperature(t);
            }
            if let Some(n) = params.max_tokens {
                options = options.num_predict(n as i32);
            }
            request = request.options(options);
        }
        request
    }
}

/// Split `scheme://host:port` into the `(scheme://host, port)` pair ollama-rs wants.
fn split_base_url(base_url: &str) -> (String, u16) {
    let (scheme, rest) = match base_url.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", base_url),
    };
    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(DEFAULT_PORT)),
        None => (rest, DEFAULT_PORT),
    };
    let host = if host.is_empty() { "localhost" } else { host };
    (format!("{}://{}", scheme, host), port)
}

fn to_ollama(message: &ChatMessage) -> OllamaMessage {
    match message.role {
        MessageRole::System => OllamaMessage::system(message.content.clone()),
        MessageRole::User => OllamaMessage::user(message.content.clone()),
        MessageRole::Assistant => OllamaMessage::assistant(message.content.clone()),
    }
}

#[async_trait]
impl ModelProvider for OllamaClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &GenerationParams,
    ) -> Result<String> {
        let request = self.request(messages, model, params);

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| AppError::provider(format!("Ollama error: {}", e), true))?;

        Ok(response.message.content)
    }

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream> {
        let request = self.request(messages, model, params);

        let mut stream_response = self
            .client
            .send_chat_messages_stream(request)
            .await
            .map_err(|e| AppError::provider(format!("Ollama stream error: {}", e), true))?;

        let output_stream = stream! {
            while let Some(chunk_result) = stream_response.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        let content = chunk.message.content;
                        if !content.is_empty() {
                            yield Ok(content);
                        }
                    }
                    Err(_) => {
                        yield Err(AppError::provider("Ollama stream chunk error", false));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(output_stream))
    }

    async fn health_check(&self) -> Result<()> {
        self.client
            .list_local_models()
            .await
            .map(|_| ())
            .map_err(|e| AppError::provider(format!("Ollama unreachable: {}", e), true))
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}
