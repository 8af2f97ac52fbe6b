//! Model catalog lookup
//!
//! Thin adapter over `GET /catalogue/api/v1/models`. The resolver never calls
//! it; the CLI uses it to turn a catalog entry into a `ModelRef`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::model::ModelRef;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog API error: {0}")]
    Http(String),

    #[error("Model '{target}' not found in catalog. Available models: {available:?}")]
    NotFound {
        target: String,
        available: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogModel {
    #[serde(default)]
    pub vendor: Option<String>,
    pub name: String,
    #[serde(default)]
    pub provider: Option<String>,
}

impl CatalogModel {
    pub fn model_ref(&self) -> ModelRef {
        ModelRef::new(self.vendor.as_deref(), self.name.clone())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    models: Vec<CatalogModel>,
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Find `target` (canonical `vendor/name` form) among catalog entries
pub fn select_model<'a>(
    models: &'a [CatalogModel],
    target: &str,
) -> Result<&'a CatalogModel, CatalogError> {
    models
        .iter()
        .find(|m| m.model_ref().canonical() == target)
        .ok_or_else(|| CatalogError::NotFound {
            target: target.to_string(),
            available: models.iter().map(|m| m.model_ref().canonical()).collect(),
        })
}

// ============================================================================
// I/O boundary
// ============================================================================

#[derive(Clone)]
pub struct CatalogClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub async fn fetch_models(&self) -> Result<Vec<CatalogModel>, CatalogError> {
        let url = format!("{}/catalogue/api/v1/models", self.base_url);
        info!("Fetching models from catalog at {}", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CatalogError::Http(e.to_string()))?;

        let body: CatalogResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::Http(e.to_string()))?;

        info!("Found {} models in catalog", body.models.len());
        Ok(body.models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<CatalogModel> {
        serde_json::from_str(
            r#"[
                {"vendor": "meta", "name": "Llama-3.1-8B-Instruct", "provider": "vllm"},
                {"vendor": "Qwen", "name": "Qwen2.5-0.5B-Instruct"},
                {"name": "tinyllama"}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_select_model_by_canonical_name() {
        let models = catalog();
        let selected = select_model(&models, "meta/Llama-3.1-8B-Instruct").unwrap();
        assert_eq!(selected.provider.as_deref(), Some("vllm"));
        assert_eq!(selected.model_ref().canonical(), "meta/Llama-3.1-8B-Instruct");

        let bare = select_model(&models, "tinyllama").unwrap();
        assert!(bare.vendor.is_none());
    }

    #[test]
    fn test_select_model_requires_vendor_when_present() {
        let models = catalog();
        let err = select_model(&models, "Llama-3.1-8B-Instruct").unwrap_err();
        match err {
            CatalogError::NotFound { available, .. } => {
                assert_eq!(available.len(), 3);
                assert!(available.contains(&"Qwen/Qwen2.5-0.5B-Instruct".to_string()));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_catalog_response_shape() {
        let body: CatalogResponse =
            serde_json::from_str(r#"{"models": [{"vendor": "a", "name": "b"}]}"#).unwrap();
        assert_eq!(body.models.len(), 1);

        let empty: CatalogResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.models.is_empty());
    }
}
