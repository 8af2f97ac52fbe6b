//! Local access to cluster-internal endpoints
//!
//! A tunnel is a background `kubectl port-forward` binding a local port to a
//! deployment's predictor service. Tunnels outlive the resolution that opened
//! them; whoever holds the `TunnelHandle` is responsible for closing it.

pub mod ports;
pub mod supervisor;

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use ports::allocate;
pub use supervisor::{ChildSupervisor, ProcessId, ProcessSpec, ProcessSupervisor};

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("No available port found in {attempts} ports starting at {start}")]
    NoPortAvailable { start: u16, attempts: u16 },

    #[error("Port forwarding to {service} failed to start: {stderr}")]
    TunnelStartFailed { service: String, stderr: String },

    #[error("Invalid endpoint URL '{0}'")]
    InvalidEndpoint(String),

    #[error("{0}")]
    SpawnFailed(String),

    #[error("Port forwarding to {0} cancelled")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Configuration
// ============================================================================

/// How forwarding processes are launched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Forwarding binary
    pub program: String,
    /// Namespace the predictor services live in
    pub namespace: String,
    /// Appended to the deployment's service name
    pub service_suffix: String,
    /// Wait before the liveness check after launch
    #[serde(rename = "grace_period_ms", with = "crate::config::millis")]
    pub grace_period: Duration,
    /// Environment handed to the forwarding process (cluster credentials etc.)
    #[serde(skip)]
    pub env: HashMap<String, String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            program: "kubectl".to_string(),
            namespace: "staging".to_string(),
            service_suffix: "-predictor".to_string(),
            grace_period: Duration::from_secs(2),
            env: HashMap::new(),
        }
    }
}

impl TunnelConfig {
    /// Snapshot the current process environment for the forwarding process
    pub fn with_process_env(mut self) -> Self {
        self.env = std::env::vars().collect();
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Port of an endpoint URL, 80 when the URL doesn't name one
pub fn remote_port(endpoint: &str) -> Result<u16, TunnelError> {
    let url = Url::parse(endpoint).map_err(|_| TunnelError::InvalidEndpoint(endpoint.to_string()))?;
    // Url drops a port equal to the scheme default, e.g. https://svc:443
    let port = if has_explicit_port(endpoint) {
        url.port_or_known_default()
    } else {
        url.port()
    };
    Ok(port.unwrap_or(80))
}

fn has_explicit_port(endpoint: &str) -> bool {
    let rest = endpoint.split_once("://").map_or(endpoint, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    match host_port.rsplit_once(':') {
        Some((host, port)) => {
            !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit())
                && (!host.starts_with('[') || host.ends_with(']'))
        }
        None => false,
    }
}

/// Whether the endpoint is already reachable on this machine
pub fn is_loopback_endpoint(endpoint: &str) -> bool {
    let Ok(url) = Url::parse(endpoint) else {
        return false;
    };
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}

/// `kubectl port-forward svc/<service><suffix> <local>:<remote> -n <namespace>`
pub fn port_forward_spec(
    config: &TunnelConfig,
    service_name: &str,
    local_port: u16,
    remote_port: u16,
) -> ProcessSpec {
    ProcessSpec {
        program: config.program.clone(),
        args: vec![
            "port-forward".to_string(),
            format!("svc/{}{}", service_name, config.service_suffix),
            format!("{}:{}", local_port, remote_port),
            "-n".to_string(),
            config.namespace.clone(),
        ],
        env: config.env.clone(),
    }
}

// ============================================================================
// Tunnel handle
// ============================================================================

/// A live forwarding session. Not `Clone`: only the holder may close it.
pub struct TunnelHandle {
    pub local_port: u16,
    /// Service the traffic is forwarded to, e.g. `qwen-llm-3f9a1c2e-predictor`
    pub remote_service_name: String,
    pub remote_port: u16,
    process: ProcessId,
    supervisor: Arc<dyn ProcessSupervisor>,
    alive: bool,
}

impl TunnelHandle {
    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.local_port)
    }

    /// Liveness as last observed; use `check_alive` for a fresh answer
    pub fn alive(&self) -> bool {
        self.alive
    }

    pub async fn check_alive(&mut self) -> bool {
        if self.alive {
            self.alive = self.supervisor.is_alive(self.process).await;
        }
        self.alive
    }

    /// Stop the forwarding process. Closing a dead tunnel is a no-op.
    pub async fn close(&mut self) -> Result<(), TunnelError> {
        self.supervisor.terminate(self.process).await?;
        if self.alive {
            info!(
                "Closed port forward localhost:{} -> {}:{}",
                self.local_port, self.remote_service_name, self.remote_port
            );
        }
        self.alive = false;
        Ok(())
    }
}

impl fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("local_port", &self.local_port)
            .field("remote_service_name", &self.remote_service_name)
            .field("remote_port", &self.remote_port)
            .field("process", &self.process)
            .field("alive", &self.alive)
            .finish()
    }
}

// ============================================================================
// Tunnel manager
// ============================================================================

pub struct TunnelManager {
    config: TunnelConfig,
    supervisor: Arc<dyn ProcessSupervisor>,
}

impl TunnelManager {
    pub fn new(config: TunnelConfig, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        Self { config, supervisor }
    }

    /// Manager backed by real `kubectl` processes
    pub fn with_child_processes(config: TunnelConfig) -> Self {
        Self::new(config, Arc::new(ChildSupervisor::new()))
    }

    /// Forward `localhost:local_port` to the predictor service behind `remote_url`.
    ///
    /// Returns only once the forwarding process has survived the grace period.
    /// Cancelling during the grace period stops the process again.
    pub async fn open(
        &self,
        service_name: &str,
        remote_url: &str,
        local_port: u16,
        cancel: &CancellationToken,
    ) -> Result<TunnelHandle, TunnelError> {
        let remote_port = remote_port(remote_url)?;
        let spec = port_forward_spec(&self.config, service_name, local_port, remote_port);
        let remote_service_name = format!("{}{}", service_name, self.config.service_suffix);

        info!(
            "Setting up port forward: localhost:{} -> {}:{}",
            local_port, remote_service_name, remote_port
        );

        let process = self.supervisor.start(&spec).await?;

        // Port-forward commonly dies within the first second (bad credentials,
        // missing service, port taken)
        let cancelled = tokio::select! {
            biased;
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.config.grace_period) => false,
        };
        if cancelled {
            if let Err(e) = self.supervisor.terminate(process).await {
                debug!("Cleanup of cancelled forward {} failed: {}", process, e);
            }
            return Err(TunnelError::Cancelled(remote_service_name));
        }

        if !self.supervisor.is_alive(process).await {
            let stderr = self.supervisor.capture_stderr(process).await;
            if let Err(e) = self.supervisor.terminate(process).await {
                debug!("Cleanup of failed forward {} failed: {}", process, e);
            }
            warn!("Port forward to {} exited early: {}", remote_service_name, stderr);
            return Err(TunnelError::TunnelStartFailed {
                service: remote_service_name,
                stderr,
            });
        }

        info!("Port forward active on localhost:{}", local_port);
        Ok(TunnelHandle {
            local_port,
            remote_service_name,
            remote_port,
            process,
            supervisor: Arc::clone(&self.supervisor),
            alive: true,
        })
    }

    pub async fn close(&self, handle: &mut TunnelHandle) -> Result<(), TunnelError> {
        handle.close().await
    }
}
