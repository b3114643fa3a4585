//! OpenAI-compatible chat-completions client.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use docqa_core::{Generator, LlmConfig, RagError, Result};

/// System message sent with every request.
const SYSTEM_PROMPT: &str = "You analyse questions about insurance and policy documents \
to improve document retrieval. Reply with a single JSON object and nothing else.";

/// Chat-completions backend.
///
/// Works with Groq, OpenAI, vLLM and other servers exposing
/// `POST {endpoint}/chat/completions`.
pub struct OpenAiGenerator {
    config: LlmConfig,
    api_key: String,
    client: Client,
}

impl OpenAiGenerator {
    /// Create a generator with an explicit API key.
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() && !is_local(&config.endpoint) {
            return Err(RagError::config("API key required for remote endpoints"));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RagError::generation(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    /// Create a generator reading the API key from `config.api_key_env`.
    pub fn from_env(config: LlmConfig) -> Result<Self> {
        let key = std::env::var(&config.api_key_env).unwrap_or_default();
        if key.is_empty() && !is_local(&config.endpoint) {
            return Err(RagError::config(format!(
                "environment variable {} is not set",
                config.api_key_env
            )));
        }
        Self::new(config, key)
    }

    /// Model name in use.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    fn build_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
            stream: Some(false),
        }
    }

    fn map_transport_error(&self, e: reqwest::Error) -> RagError {
        if e.is_timeout() {
            RagError::timeout("generation request", self.config.timeout_ms)
        } else {
            RagError::generation(e.to_string())
        }
    }
}

fn is_local(endpoint: &str) -> bool {
    endpoint.starts_with("http://localhost") || endpoint.starts_with("http://127.0.0.1")
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let start = Instant::now();
        let request = self.build_request(prompt);

        let mut builder = self.client.post(self.chat_url()).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Generation request failed with HTTP {}", status);
            return Err(RagError::generation(format!("HTTP {}: {}", status, body)));
        }

        let response: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let text = first_content(response)?;

        debug!(
            "Generation completed in {}ms ({} chars)",
            start.elapsed().as_millis(),
            text.len()
        );

        Ok(text)
    }
}

fn first_content(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| RagError::generation("No choices in response"))
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
