//! Deployment naming and creation payloads

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{HealthInfo, ModelInfo, ModelRef};

/// Longest prefix that still leaves room for `-<8 hex>-predictor` inside a
/// 63 character service name
const MAX_NAME_PREFIX: usize = 44;

static NON_DNS_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex is valid"));

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Reduce a model name to something usable as a cluster service name prefix
/// e.g. "Qwen2.5-0.5B-Instruct" -> "qwen2-5-0-5b-instruct"
pub fn sanitize_service_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut sanitized = NON_DNS_CHARS
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string();

    sanitized.truncate(MAX_NAME_PREFIX);
    let sanitized = sanitized.trim_end_matches('-').to_string();

    match sanitized.chars().next() {
        None => "model".to_string(),
        Some(c) if c.is_ascii_digit() => format!("m-{}", sanitized),
        Some(_) => sanitized,
    }
}

/// Suffix derived from SHA-256 over a nanosecond timestamp and 16 random bytes.
/// Only used to keep concurrent deployments apart.
fn unique_suffix() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let random_bytes: [u8; 16] = rand::random();

    let mut hasher = Sha256::new();
    hasher.update(nanos.to_string().as_bytes());
    hasher.update(random_bytes);
    let hash = format!("{:x}", hasher.finalize());

    hash[..8].to_string()
}

/// Generate a fresh deployment name for a model, e.g. "qwen2-5-0-5b-instruct-3f9a1c2e"
pub fn generate_deployment_name(model: &ModelRef) -> String {
    format!("{}-{}", sanitize_service_name(&model.name), unique_suffix())
}

// ============================================================================
// Creation payload (POST /modman/new)
// ============================================================================

/// Body of a deployment creation request.
///
/// The service fills in every `None` field; they are still sent as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentPayload {
    pub uuid: Option<String>,
    pub model_info: ModelInfo,
    pub namespace: String,
    pub node_name: Option<String>,
    pub storage_uri: String,
    pub instance: Option<String>,
    pub health_info: HealthInfo,
    pub created_at: Option<String>,
    pub expires_at: Option<String>,
    pub endpoint: Option<String>,
}

impl DeploymentPayload {
    /// Build a payload for `model` under the working name `name`.
    ///
    /// `storage_uri_template` may contain `{model}`, replaced with the
    /// canonical model form.
    pub fn new(name: &str, model: &ModelRef, namespace: &str, storage_uri_template: &str) -> Self {
        let canonical = model.canonical();

        Self {
            uuid: None,
            model_info: ModelInfo {
                model_name: Some(name.to_string()),
                model_path: Some(canonical.clone()),
                url: Some(format!("https://huggingface.co/{}/tree/main", canonical)),
            },
            namespace: namespace.to_string(),
            node_name: None,
            storage_uri: storage_uri_template.replace("{model}", &canonical),
            instance: None,
            health_info: HealthInfo {
                status: Some("StandBy".to_string()),
                details: None,
                last_probe: None,
            },
            created_at: None,
            expires_at: None,
            endpoint: None,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model_info.model_name.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_service_name() {
        assert_eq!(
            sanitize_service_name("Qwen2.5-0.5B-Instruct"),
            "qwen2-5-0-5b-instruct"
        );
        assert_eq!(sanitize_service_name("Llama_3.1__8B"), "llama-3-1-8b");
        assert_eq!(sanitize_service_name("---"), "model");
        assert_eq!(sanitize_service_name("7b-chat"), "m-7b-chat");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "a".repeat(100);
        let sanitized = sanitize_service_name(&long);
        assert_eq!(sanitized.len(), MAX_NAME_PREFIX);
    }

    #[test]
    fn test_generate_deployment_name() {
        let model = ModelRef::new(Some("Qwen"), "Qwen2.5-0.5B-Instruct");
        let name = generate_deployment_name(&model);

        let (prefix, suffix) = name.rsplit_once('-').unwrap();
        assert_eq!(prefix, "qwen2-5-0-5b-instruct");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(format!("{}-predictor", name).len() <= 63);
    }

    #[test]
    fn test_generated_names_differ() {
        let model = ModelRef::new(None, "gpt2");
        assert_ne!(
            generate_deployment_name(&model),
            generate_deployment_name(&model)
        );
    }

    #[test]
    fn test_payload_shape() {
        let model = ModelRef::new(Some("Qwen"), "Qwen2.5-0.5B-Instruct");
        let payload = DeploymentPayload::new(
            "qwen-llm-1a2b3c4d",
            &model,
            "staging",
            "s3://models/{model}/",
        );

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["uuid"].is_null());
        assert_eq!(json["model_info"]["model_name"], "qwen-llm-1a2b3c4d");
        assert_eq!(json["model_info"]["model_path"], "Qwen/Qwen2.5-0.5B-Instruct");
        assert_eq!(
            json["model_info"]["url"],
            "https://huggingface.co/Qwen/Qwen2.5-0.5B-Instruct/tree/main"
        );
        assert_eq!(json["namespace"], "staging");
        assert!(json["node_name"].is_null());
        assert_eq!(json["storage_uri"], "s3://models/Qwen/Qwen2.5-0.5B-Instruct/");
        assert!(json["instance"].is_null());
        assert_eq!(json["health_info"]["status"], "StandBy");
        assert!(json["health_info"]["details"].is_null());
        assert!(json["health_info"]["last_probe"].is_null());
        assert!(json["created_at"].is_null());
        assert!(json["expires_at"].is_null());
        assert!(json["endpoint"].is_null());
        assert_eq!(payload.model_name(), "qwen-llm-1a2b3c4d");
    }
}
