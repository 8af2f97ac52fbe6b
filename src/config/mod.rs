use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resolver::{DeploymentSettings, PollConfig, PortRange, ResolverOptions};
use crate::retry::RetryPolicy;
use crate::tunnel::TunnelConfig;

/// Default management service URL
pub const DEFAULT_SERVICE_URL: &str = "http://localhost:8080";

/// Default catalog service URL
pub const DEFAULT_CATALOG_URL: &str = "http://localhost:9090";

/// Default config file location: ~/.llmdeploy/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".llmdeploy")
        .join("config.yaml")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    WriteError(String),

    #[error("Failed to load env file {path}: {cause}")]
    EnvFile { path: PathBuf, cause: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Per-request timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    #[serde(rename = "service_secs", with = "secs")]
    pub service: Duration,
    #[serde(rename = "verify_secs", with = "secs")]
    pub verify: Duration,
    #[serde(rename = "inference_secs", with = "secs")]
    pub inference: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            service: crate::client::modman::DEFAULT_SERVICE_TIMEOUT,
            verify: crate::client::openai::DEFAULT_LIST_TIMEOUT,
            inference: crate::client::openai::DEFAULT_COMPLETION_TIMEOUT,
        }
    }
}

/// Everything `llmdeploy` reads from its settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub service_url: String,
    pub catalog_url: String,
    /// Bearer token for the inference endpoints, if they need one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub deployment: DeploymentSettings,
    pub poll: PollConfig,
    pub ports: PortRange,
    pub tunnel: TunnelConfig,
    pub retry: RetryPolicy,
    pub timeouts: Timeouts,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            api_key: None,
            deployment: DeploymentSettings::default(),
            poll: PollConfig::default(),
            ports: PortRange::default(),
            tunnel: TunnelConfig::default(),
            retry: RetryPolicy::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Settings {
    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            deployment: self.deployment.clone(),
            poll: self.poll.clone(),
            ports: self.ports.clone(),
            retry: self.retry.clone(),
        }
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Parse settings from a YAML string. Missing keys take their defaults.
pub fn parse_settings(content: &str) -> Result<Settings, ConfigError> {
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

pub fn serialize_settings(settings: &Settings) -> Result<String, ConfigError> {
    serde_yaml::to_string(settings).map_err(|e| ConfigError::WriteError(e.to_string()))
}

/// Expand `~` and `$VAR` in a user-supplied path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load settings from the default location
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_from(&default_config_path())
}

/// Load settings from a specific path; a missing file yields defaults
pub fn load_settings_from(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_settings(&content)
}

/// Load `KEY=value` pairs into the process environment
pub fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    dotenvy::from_path(path).map_err(|e| ConfigError::EnvFile {
        path: path.to_path_buf(),
        cause: e.to_string(),
    })
}

// ============================================================================
// Duration encodings
// ============================================================================

/// `Duration` as whole milliseconds
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `Duration` as whole seconds
pub(crate) mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.service_url, "http://localhost:8080");
        assert_eq!(settings.deployment.namespace, "staging");
        assert_eq!(settings.poll.max_attempts, 30);
        assert_eq!(settings.poll.interval, Duration::from_secs(10));
        assert_eq!(settings.ports.start, 8000);
        assert_eq!(settings.ports.max_attempts, 100);
        assert_eq!(settings.tunnel.program, "kubectl");
        assert_eq!(settings.tunnel.grace_period, Duration::from_secs(2));
        assert_eq!(settings.timeouts.inference, Duration::from_secs(120));
    }

    #[test]
    fn test_parse_partial_settings() {
        let content = r#"
service_url: http://modman.internal:8080
deployment:
  namespace: prod
  storage_uri: "s3://models/{model}"
poll:
  max_attempts: 60
tunnel:
  grace_period_ms: 3000
timeouts:
  verify_secs: 5
"#;
        let settings = parse_settings(content).unwrap();

        assert_eq!(settings.service_url, "http://modman.internal:8080");
        assert_eq!(settings.catalog_url, DEFAULT_CATALOG_URL);
        assert_eq!(settings.deployment.namespace, "prod");
        assert_eq!(settings.deployment.storage_uri, "s3://models/{model}");
        assert_eq!(settings.poll.max_attempts, 60);
        assert_eq!(settings.poll.interval, Duration::from_secs(10));
        assert_eq!(settings.tunnel.grace_period, Duration::from_millis(3000));
        assert_eq!(settings.tunnel.service_suffix, "-predictor");
        assert_eq!(settings.timeouts.verify, Duration::from_secs(5));
        assert_eq!(settings.timeouts.service, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_empty_is_default() {
        assert_eq!(parse_settings("").unwrap(), Settings::default());
        assert_eq!(parse_settings("  \n").unwrap(), Settings::default());
    }

    #[test]
    fn test_parse_invalid() {
        let result = parse_settings("poll: [1, 2");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));

        let result = parse_settings("ports:\n  start: not-a-port\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_serialize_roundtrip_keeps_units() {
        let yaml = serialize_settings(&Settings::default()).unwrap();
        assert!(yaml.contains("interval_secs: 10"));
        assert!(yaml.contains("grace_period_ms: 2000"));
        assert!(yaml.contains("initial_delay_ms: 3000"));
        assert!(!yaml.contains("api_key"));
        assert_eq!(parse_settings(&yaml).unwrap(), Settings::default());
    }

    #[test]
    fn test_resolver_options() {
        let mut settings = Settings::default();
        settings.ports.start = 9100;
        settings.retry.max_attempts = 1;

        let options = settings.resolver_options();
        assert_eq!(options.ports.start, 9100);
        assert_eq!(options.retry.max_attempts, 1);
        assert_eq!(options.poll, settings.poll);
    }

    #[test]
    fn test_load_settings_from_file() {
        let file = create_temp_file("catalog_url: http://catalog:9090\n");
        let settings = load_settings_from(file.path()).unwrap();
        assert_eq!(settings.catalog_url, "http://catalog:9090");
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let settings = load_settings_from(Path::new("/nonexistent/llmdeploy.yaml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_env_file() {
        let file = create_temp_file("LLMDEPLOY_TEST_KUBE_TOKEN=abc123\n");
        load_env_file(file.path()).unwrap();
        assert_eq!(std::env::var("LLMDEPLOY_TEST_KUBE_TOKEN").unwrap(), "abc123");
    }

    #[test]
    fn test_load_missing_env_file() {
        let result = load_env_file(Path::new("/nonexistent/.env"));
        assert!(matches!(result, Err(ConfigError::EnvFile { .. })));
    }

    #[test]
    fn test_expand_path() {
        let expanded = expand_path("/etc/llmdeploy.yaml");
        assert_eq!(expanded, PathBuf::from("/etc/llmdeploy.yaml"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/x.yaml"), home.join("x.yaml"));
        }
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with(".llmdeploy/config.yaml"));
    }
}
