use crate::error::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_COMPLETION_ENDPOINT: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_COMPLETION_MODEL: &str = "llama-3.1-8b-instant";

/// Language-model capability: one prompt in, one completion out. Calls run
/// to completion or error; nothing is cancellable mid-flight.
#[async_trait]
pub trait ChatModel {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, ModelError>;
}

#[async_trait]
impl<M: ChatModel + Send + Sync> ChatModel for std::sync::Arc<M> {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, ModelError> {
        (**self).complete(prompt, temperature).await
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_COMPLETION_ENDPOINT.to_string(),
            model: DEFAULT_COMPLETION_MODEL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Chat-completions client for Groq's OpenAI-compatible API.
pub struct GroqChatModel {
    endpoint: String,
    model: String,
    api_key: String,
    client: Client,
}

impl GroqChatModel {
    /// Fails with a configuration error when the credential is absent. A
    /// missing key is fatal at construction time, never discovered mid-call.
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        let api_key = config
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ModelError::Configuration(
                    "GROQ_API_KEY is not set; export it or pass --groq-api-key".to_string(),
                )
            })?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model,
            api_key,
            client: Client::new(),
        })
    }
}

#[async_trait]
impl ChatModel for GroqChatModel {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, ModelError> {
        let payload = CompletionRequest {
            model: &self.model,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ModelError::Response(format!(
                "completion request returned {}",
                response.status()
            )));
        }

        let parsed: CompletionResponse = response.json().await?;
        let answer = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ModelError::Response("completion had no choices".to_string()))?;

        Ok(answer)
    }
}
