use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{DeploymentInfo, DeploymentPayload, DeploymentRecord};

/// Per-call timeout for the management service
pub const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModmanError {
    #[error("Deployment service unavailable ({operation}): {cause}")]
    ServiceUnavailable {
        operation: &'static str,
        cause: String,
    },

    #[error("No deployment ID returned from service")]
    NoDeploymentId,
}

impl ModmanError {
    fn unavailable(operation: &'static str, cause: impl ToString) -> Self {
        Self::ServiceUnavailable {
            operation,
            cause: cause.to_string(),
        }
    }

    /// Transport and HTTP failures may clear up; a malformed create response won't
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. })
    }
}

// ============================================================================
// SBIO: Pure response parsing (no I/O)
// ============================================================================

/// Extract the deployment id from a `/modman/new` response
pub fn parse_create_response(body: &Value) -> Result<String, ModmanError> {
    body.get("uuid")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(ModmanError::NoDeploymentId)
}

/// Convert a `/modman/list` response, dropping entries the service sent
/// without an id
pub fn parse_list_response(infos: Vec<DeploymentInfo>) -> Vec<DeploymentRecord> {
    infos
        .into_iter()
        .filter(|info| info.uuid.as_deref().is_some_and(|id| !id.is_empty()))
        .map(|info| info.into_record(""))
        .collect()
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

/// Operations against the model management service.
///
/// Each call is a single bounded request; retries belong to the caller.
#[async_trait]
pub trait DeploymentClient: Send + Sync {
    async fn list(&self) -> Result<Vec<DeploymentRecord>, ModmanError>;

    /// Returns the id assigned by the service
    async fn create(&self, payload: &DeploymentPayload) -> Result<String, ModmanError>;

    async fn start(&self, deployment_id: &str) -> Result<(), ModmanError>;

    async fn get_status(&self, deployment_id: &str) -> Result<DeploymentRecord, ModmanError>;
}

// ============================================================================
// SBIO: I/O implementation (real HTTP client)
// ============================================================================

#[derive(Clone)]
pub struct HttpDeploymentClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpDeploymentClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_SERVICE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ModmanError> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ModmanError::unavailable(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ModmanError::unavailable(
                operation,
                format!("HTTP {} - {}", status.as_u16(), text),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl DeploymentClient for HttpDeploymentClient {
    async fn list(&self) -> Result<Vec<DeploymentRecord>, ModmanError> {
        let url = format!("{}/modman/list", self.base_url);
        let response = self.send("list", self.client.post(&url)).await?;

        let infos: Vec<DeploymentInfo> = response
            .json()
            .await
            .map_err(|e| ModmanError::unavailable("list", e))?;

        let records = parse_list_response(infos);
        debug!("Service reported {} deployments", records.len());
        Ok(records)
    }

    async fn create(&self, payload: &DeploymentPayload) -> Result<String, ModmanError> {
        let url = format!("{}/modman/new", self.base_url);
        info!(
            "Creating deployment with model name: {}",
            payload.model_name()
        );

        let response = self
            .send("create", self.client.post(&url).json(payload))
            .await?;

        // An unreadable body means no usable id, same as a missing one
        let body: Value = response
            .json()
            .await
            .map_err(|_| ModmanError::NoDeploymentId)?;

        let deployment_id = parse_create_response(&body)?;
        info!("Deployment created with ID: {}", deployment_id);
        Ok(deployment_id)
    }

    async fn start(&self, deployment_id: &str) -> Result<(), ModmanError> {
        let url = format!("{}/modman/start/{}", self.base_url, deployment_id);
        info!("Starting deployment {}", deployment_id);

        self.send("start", self.client.post(&url)).await?;
        debug!("Deployment start command sent");
        Ok(())
    }

    async fn get_status(&self, deployment_id: &str) -> Result<DeploymentRecord, ModmanError> {
        let url = format!("{}/modman/info/{}", self.base_url, deployment_id);
        let response = self.send("info", self.client.get(&url)).await?;

        let info: DeploymentInfo = response
            .json()
            .await
            .map_err(|e| ModmanError::unavailable("info", e))?;

        Ok(info.into_record(deployment_id))
    }
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::model::DeploymentStatus;

    pub fn record(id: &str, status: DeploymentStatus, endpoint: Option<&str>) -> DeploymentRecord {
        DeploymentRecord {
            id: id.to_string(),
            model_path: String::new(),
            model_name: None,
            status,
            details: None,
            internal_endpoint: endpoint.map(str::to_string),
            created_at: None,
        }
    }

    pub fn unavailable() -> ModmanError {
        ModmanError::ServiceUnavailable {
            operation: "mock",
            cause: "connection refused".to_string(),
        }
    }

    /// Scripted management service.
    ///
    /// `get_status` replays `statuses` in order and repeats the last entry
    /// once the script runs out.
    pub struct MockDeploymentClient {
        deployments: Mutex<VecDeque<Result<Vec<DeploymentRecord>, ModmanError>>>,
        create_result: Result<String, ModmanError>,
        start_result: Result<(), ModmanError>,
        statuses: Mutex<VecDeque<Result<DeploymentRecord, ModmanError>>>,
        last_status: Mutex<Option<Result<DeploymentRecord, ModmanError>>>,
        pub created: Mutex<Vec<DeploymentPayload>>,
        list_calls: AtomicUsize,
        start_calls: AtomicUsize,
        status_calls: AtomicUsize,
    }

    impl MockDeploymentClient {
        pub fn new() -> Self {
            Self {
                deployments: Mutex::new(VecDeque::new()),
                create_result: Ok("d-1".to_string()),
                start_result: Ok(()),
                statuses: Mutex::new(VecDeque::new()),
                last_status: Mutex::new(None),
                created: Mutex::new(Vec::new()),
                list_calls: AtomicUsize::new(0),
                start_calls: AtomicUsize::new(0),
                status_calls: AtomicUsize::new(0),
            }
        }

        /// Result of the next `list` call; the last one repeats
        pub fn with_list(self, result: Result<Vec<DeploymentRecord>, ModmanError>) -> Self {
            self.deployments.lock().unwrap().push_back(result);
            self
        }

        pub fn with_create(mut self, result: Result<String, ModmanError>) -> Self {
            self.create_result = result;
            self
        }

        pub fn with_start(mut self, result: Result<(), ModmanError>) -> Self {
            self.start_result = result;
            self
        }

        pub fn with_statuses(
            self,
            statuses: Vec<Result<DeploymentRecord, ModmanError>>,
        ) -> Self {
            self.statuses.lock().unwrap().extend(statuses);
            self
        }

        pub fn list_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }

        pub fn create_calls(&self) -> usize {
            self.created.lock().unwrap().len()
        }

        pub fn start_calls(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
        }

        pub fn status_calls(&self) -> usize {
            self.status_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeploymentClient for MockDeploymentClient {
        async fn list(&self) -> Result<Vec<DeploymentRecord>, ModmanError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let mut deployments = self.deployments.lock().unwrap();
            if deployments.len() > 1 {
                deployments.pop_front().unwrap()
            } else {
                deployments.front().cloned().unwrap_or(Ok(Vec::new()))
            }
        }

        async fn create(&self, payload: &DeploymentPayload) -> Result<String, ModmanError> {
            self.created.lock().unwrap().push(payload.clone());
            self.create_result.clone()
        }

        async fn start(&self, _deployment_id: &str) -> Result<(), ModmanError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            self.start_result.clone()
        }

        async fn get_status(&self, deployment_id: &str) -> Result<DeploymentRecord, ModmanError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.statuses.lock().unwrap().pop_front();
            let mut last = self.last_status.lock().unwrap();
            if let Some(next) = next {
                *last = Some(next);
            }
            match last.clone() {
                Some(Ok(mut record)) => {
                    record.id = deployment_id.to_string();
                    Ok(record)
                }
                Some(Err(e)) => Err(e),
                None => Err(unavailable()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_create_response() {
        assert_eq!(
            parse_create_response(&json!({"uuid": "abc-123"})).unwrap(),
            "abc-123"
        );
    }

    #[test]
    fn test_parse_create_response_missing_id() {
        assert_eq!(
            parse_create_response(&json!({})),
            Err(ModmanError::NoDeploymentId)
        );
        assert_eq!(
            parse_create_response(&json!({"uuid": ""})),
            Err(ModmanError::NoDeploymentId)
        );
        assert_eq!(
            parse_create_response(&json!({"uuid": 42})),
            Err(ModmanError::NoDeploymentId)
        );
    }

    #[test]
    fn test_parse_list_response_skips_missing_ids() {
        let infos: Vec<DeploymentInfo> = serde_json::from_value(json!([
            {"uuid": "a", "health_info": {"status": "Running"}, "endpoint": "http://a:80"},
            {"health_info": {"status": "Running"}},
            {"uuid": "", "health_info": {"status": "Running"}},
            {"uuid": "b", "health_info": {"status": "StandBy"}}
        ]))
        .unwrap();

        let records = parse_list_response(infos);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "a");
        assert_eq!(records[1].id, "b");
    }

    #[test]
    fn test_error_transience() {
        assert!(mock::unavailable().is_transient());
        assert!(!ModmanError::NoDeploymentId.is_transient());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = HttpDeploymentClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        // Port 1 is never listening
        let client = HttpDeploymentClient::new("http://127.0.0.1:1")
            .with_timeout(Duration::from_secs(2));
        let err = client.list().await.unwrap_err();
        assert!(matches!(
            err,
            ModmanError::ServiceUnavailable {
                operation: "list",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_mock_status_script_repeats_last() {
        use crate::model::DeploymentStatus;

        let client = mock::MockDeploymentClient::new().with_statuses(vec![
            Ok(mock::record("x", DeploymentStatus::Starting, None)),
            Err(mock::unavailable()),
        ]);

        assert_eq!(
            client.get_status("d-1").await.unwrap().status,
            DeploymentStatus::Starting
        );
        assert!(client.get_status("d-1").await.is_err());
        assert!(client.get_status("d-1").await.is_err());
        assert_eq!(client.status_calls(), 3);
    }
}
