//! Endpoint verification
//!
//! Asks a freshly exposed endpoint which model it serves. Verification is
//! best-effort: any failure yields the caller's fallback identifier.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::openai::{OpenAiClientTrait, DEFAULT_LIST_TIMEOUT};

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Served model id from a `/v1/models` body.
///
/// Understands the OpenAI shape (`data[0].id`) and the plain `models` list
/// some servers return, whose entries may be strings or objects.
pub fn extract_model_id(body: &Value) -> Option<String> {
    if let Some(id) = body
        .get("data")
        .and_then(|d| d.get(0))
        .and_then(|m| m.get("id"))
        .and_then(Value::as_str)
    {
        return Some(id.to_string());
    }

    match body.get("models").and_then(|m| m.get(0))? {
        Value::String(id) => Some(id.clone()),
        Value::Object(entry) => entry
            .get("id")
            .or_else(|| entry.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

// ============================================================================
// Verifier
// ============================================================================

pub struct EndpointVerifier {
    client: Arc<dyn OpenAiClientTrait>,
    timeout: Duration,
}

impl EndpointVerifier {
    pub fn new(client: Arc<dyn OpenAiClientTrait>) -> Self {
        Self {
            client,
            timeout: DEFAULT_LIST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Model id served at `endpoint`, or `fallback` if it can't be determined
    pub async fn verify(&self, endpoint: &str, fallback: &str) -> String {
        debug!("Verifying endpoint {}", endpoint);

        let body = match tokio::time::timeout(self.timeout, self.client.list_models(endpoint)).await
        {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!("Could not verify endpoint {}: {}", endpoint, e);
                return fallback.to_string();
            }
            Err(_) => {
                warn!(
                    "Endpoint {} did not answer within {:?}",
                    endpoint, self.timeout
                );
                return fallback.to_string();
            }
        };

        match extract_model_id(&body) {
            Some(id) => {
                info!("Endpoint {} serves model {}", endpoint, id);
                id
            }
            None => {
                warn!("Unrecognized model listing from {}, using {}", endpoint, fallback);
                fallback.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::openai::mock::MockOpenAiClient;
    use crate::client::openai::{ChatCompletionRequest, ChatCompletionResponse, ClientError};
    use async_trait::async_trait;
    use serde_json::json;

    #[test]
    fn test_extract_openai_shape() {
        let body = json!({"object": "list", "data": [{"id": "Qwen/Qwen2.5-0.5B-Instruct"}, {"id": "other"}]});
        assert_eq!(
            extract_model_id(&body).as_deref(),
            Some("Qwen/Qwen2.5-0.5B-Instruct")
        );
    }

    #[test]
    fn test_extract_models_shape() {
        assert_eq!(
            extract_model_id(&json!({"models": ["llama3"]})).as_deref(),
            Some("llama3")
        );
        assert_eq!(
            extract_model_id(&json!({"models": [{"name": "llama3:8b"}]})).as_deref(),
            Some("llama3:8b")
        );
        assert_eq!(
            extract_model_id(&json!({"models": [{"id": "a", "name": "b"}]})).as_deref(),
            Some("a")
        );
    }

    #[test]
    fn test_extract_unrecognized() {
        assert_eq!(extract_model_id(&json!({"data": []})), None);
        assert_eq!(extract_model_id(&json!({"models": []})), None);
        assert_eq!(extract_model_id(&json!({"models": [42]})), None);
        assert_eq!(extract_model_id(&json!({})), None);
        assert_eq!(extract_model_id(&json!([1, 2])), None);
    }

    #[test]
    fn test_data_takes_precedence_over_models() {
        let body = json!({"data": [{"id": "from-data"}], "models": ["from-models"]});
        assert_eq!(extract_model_id(&body).as_deref(), Some("from-data"));
    }

    #[tokio::test]
    async fn test_verify_returns_served_id() {
        let client = Arc::new(
            MockOpenAiClient::new(vec![])
                .with_models(json!({"data": [{"id": "Llama-3.1-8B-Instruct"}]})),
        );
        let verifier = EndpointVerifier::new(client.clone());

        let id = verifier
            .verify("http://localhost:8010", "meta/Llama-3.1-8B-Instruct")
            .await;
        assert_eq!(id, "Llama-3.1-8B-Instruct");
        assert_eq!(
            client.probed.lock().unwrap().as_slice(),
            ["http://localhost:8010"]
        );
    }

    #[tokio::test]
    async fn test_verify_falls_back_on_error() {
        let verifier =
            EndpointVerifier::new(Arc::new(MockOpenAiClient::new(vec![]).failing("refused")));
        assert_eq!(verifier.verify("http://localhost:1", "fallback").await, "fallback");
    }

    #[tokio::test]
    async fn test_verify_falls_back_on_unrecognized_body() {
        let verifier = EndpointVerifier::new(Arc::new(
            MockOpenAiClient::new(vec![]).with_models(json!({"status": "ok"})),
        ));
        assert_eq!(verifier.verify("http://localhost:1", "fallback").await, "fallback");
    }

    struct HangingClient;

    #[async_trait]
    impl OpenAiClientTrait for HangingClient {
        async fn list_models(&self, _base_url: &str) -> Result<Value, ClientError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!({"data": [{"id": "too-late"}]}))
        }

        async fn chat_completion(
            &self,
            _base_url: &str,
            _request: &ChatCompletionRequest,
        ) -> Result<ChatCompletionResponse, ClientError> {
            Err(ClientError::Http("unused".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_falls_back_on_timeout() {
        let verifier = EndpointVerifier::new(Arc::new(HangingClient));

        let started = tokio::time::Instant::now();
        assert_eq!(verifier.verify("http://localhost:1", "fallback").await, "fallback");
        assert_eq!(started.elapsed(), DEFAULT_LIST_TIMEOUT);
    }
}
