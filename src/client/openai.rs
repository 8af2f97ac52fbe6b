use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Timeout for the `/v1/models` identity check
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a single chat completion
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat completion paths, tried in order
pub const CHAT_COMPLETION_PATHS: [&str; 2] = ["/v1/chat/completions", "/openai/v1/chat/completions"];

// ============================================================================
// Data structures (pure, no I/O)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatCompletionRequest {
    /// Single user question with the defaults used for deployment smoke tests
    pub fn question(model: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::user(question)],
            max_tokens: Some(512),
            temperature: Some(0.7),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: String,
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

impl ChatCompletionResponse {
    pub fn answer(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

/// OpenAI-compatible inference endpoint, addressed by base URL per call
#[async_trait]
pub trait OpenAiClientTrait: Send + Sync {
    /// Raw body of `GET {base_url}/v1/models`
    async fn list_models(&self, base_url: &str) -> Result<Value, ClientError>;

    async fn chat_completion(
        &self,
        base_url: &str,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ClientError>;
}

// ============================================================================
// SBIO: I/O implementation (real HTTP client)
// ============================================================================

#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: Option<String>,
    list_timeout: Duration,
    completion_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            list_timeout: DEFAULT_LIST_TIMEOUT,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, list: Duration, completion: Duration) -> Self {
        self.list_timeout = list;
        self.completion_timeout = completion;
        self
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => req.header("Authorization", format!("Bearer {}", key)),
            None => req,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(response)
    }

    async fn post_completion(
        &self,
        url: &str,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ClientError> {
        let req = self
            .authorize(self.client.post(url).json(request))
            .timeout(self.completion_timeout);

        let response = req.send().await.map_err(|e| ClientError::Http(e.to_string()))?;
        let response = Self::check(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }
}

#[async_trait]
impl OpenAiClientTrait for OpenAiClient {
    async fn list_models(&self, base_url: &str) -> Result<Value, ClientError> {
        let url = format!("{}/v1/models", base_url.trim_end_matches('/'));

        let req = self
            .authorize(self.client.get(&url))
            .timeout(self.list_timeout);

        let response = req.send().await.map_err(|e| ClientError::Http(e.to_string()))?;
        let response = Self::check(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }

    async fn chat_completion(
        &self,
        base_url: &str,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ClientError> {
        let base_url = base_url.trim_end_matches('/');
        let mut last_error = ClientError::Http("No valid API endpoint found".to_string());

        for path in CHAT_COMPLETION_PATHS {
            let url = format!("{}{}", base_url, path);
            match self.post_completion(&url, request).await {
                Ok(response) => {
                    debug!("Using completion endpoint: {}", path);
                    return Ok(response);
                }
                Err(e) => {
                    debug!("Completion via {} failed: {}", path, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================
