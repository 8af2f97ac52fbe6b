//! Deployment data model
//!
//! Typed views over the model management service's records, plus the
//! `ModelRef` used to match a request against them.

pub mod payload;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use payload::{generate_deployment_name, sanitize_service_name, DeploymentPayload};

// ============================================================================
// Model references
// ============================================================================

/// A requested model, e.g. `meta/Llama-3.1-8B-Instruct` or `Llama-3.1-8B-Instruct`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    pub name: String,
}

impl ModelRef {
    pub fn new(vendor: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            vendor: vendor.filter(|v| !v.is_empty()).map(str::to_string),
            name: name.into(),
        }
    }

    /// `vendor/name` when a vendor is present, otherwise the bare name
    pub fn canonical(&self) -> String {
        match self.vendor.as_deref() {
            Some(vendor) if !vendor.is_empty() => format!("{}/{}", vendor, self.name),
            _ => self.name.clone(),
        }
    }

    /// Whether a deployment's `model_path` refers to this model.
    ///
    /// Accepts the canonical form or the bare name. Two vendors publishing the
    /// same bare name will both match.
    pub fn matches_path(&self, model_path: &str) -> bool {
        model_path == self.canonical() || model_path == self.name
    }
}

impl PartialEq for ModelRef {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for ModelRef {}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for ModelRef {
    type Err = String;

    /// Splits on the first `/`: `vendor/name` or a bare `name`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("model reference must not be empty".to_string());
        }
        match s.split_once('/') {
            Some((vendor, name)) if !name.is_empty() => Ok(Self::new(Some(vendor), name)),
            Some(_) => Err(format!("model reference '{}' has an empty name", s)),
            None => Ok(Self::new(None, s)),
        }
    }
}

// ============================================================================
// Deployment status
// ============================================================================

/// Health status reported by the management service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    StandBy,
    Starting,
    Running,
    Failed,
    Error,
    Unknown,
}

impl DeploymentStatus {
    /// Map the service's free-text status field
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "standby" => Self::StandBy,
            "starting" => Self::Starting,
            "running" => Self::Running,
            "failed" => Self::Failed,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// `Failed` or `Error`: the deployment will not recover on its own
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StandBy => "standby",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Wire format (management service JSON)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthInfo {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub last_probe: Option<String>,
}

/// One deployment as returned by `/modman/info/{uuid}` and `/modman/list`.
///
/// Every field is optional on the wire; `into_record` decides what a usable
/// record looks like.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeploymentInfo {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub model_info: Option<ModelInfo>,
    #[serde(default)]
    pub health_info: Option<HealthInfo>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl DeploymentInfo {
    /// Convert to a typed record. `fallback_id` is used when the body omits
    /// `uuid` (the info endpoint is addressed by id and may not echo it).
    pub fn into_record(self, fallback_id: &str) -> DeploymentRecord {
        let health = self.health_info.unwrap_or_default();
        let model = self.model_info.unwrap_or_default();

        DeploymentRecord {
            id: self
                .uuid
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| fallback_id.to_string()),
            model_path: model.model_path.unwrap_or_default(),
            model_name: model.model_name.filter(|n| !n.is_empty()),
            status: health
                .status
                .as_deref()
                .map(DeploymentStatus::parse)
                .unwrap_or(DeploymentStatus::Unknown),
            details: health.details,
            internal_endpoint: self.endpoint.filter(|e| !e.is_empty()),
            created_at: self.created_at,
        }
    }
}

// ============================================================================
// Typed deployment record
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentRecord {
    pub id: String,
    /// Which weights are loaded, e.g. `Qwen/Qwen2.5-0.5B-Instruct`
    pub model_path: String,
    /// Working name, also the cluster service name prefix
    pub model_name: Option<String>,
    pub status: DeploymentStatus,
    /// Failure details reported alongside `Failed`/`Error`
    pub details: Option<String>,
    /// Only populated once the deployment is running
    pub internal_endpoint: Option<String>,
    pub created_at: Option<String>,
}

impl DeploymentRecord {
    /// Running with an endpoint to talk to
    pub fn is_serving(&self) -> bool {
        self.status == DeploymentStatus::Running && self.internal_endpoint.is_some()
    }
}
