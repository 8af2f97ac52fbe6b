//! Deployment resolution
//!
//! Turns a model reference into a verified, reachable inference endpoint:
//! reuse a running deployment when one serves the model, provision a new one
//! otherwise. Either way the endpoint is exposed locally (tunnelling if it is
//! cluster-internal) and asked which model it actually serves.

pub mod poller;
pub mod verifier;

use std::future::Future;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::modman::{DeploymentClient, ModmanError};
use crate::model::{
    generate_deployment_name, DeploymentPayload, DeploymentRecord, DeploymentStatus, ModelRef,
};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::tunnel::{self, ports, TunnelError, TunnelHandle, TunnelManager};

pub use poller::{poll_until_running, PollConfig, PollError};
pub use verifier::{extract_model_id, EndpointVerifier};

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ResolveCause {
    #[error(transparent)]
    Service(#[from] ModmanError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error("Deployment {0} has no service name to forward to")]
    MissingServiceName(String),

    #[error("Resolution cancelled")]
    Cancelled,
}

impl ResolveCause {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Poll(PollError::Cancelled))
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Failed to resolve {model} (deployment: {}): {cause}", .deployment.as_deref().unwrap_or("none"))]
    ResolutionFailed {
        model: String,
        deployment: Option<String>,
        #[source]
        cause: ResolveCause,
    },
}

impl ResolveError {
    fn failed(model: &ModelRef, deployment: Option<&str>, cause: impl Into<ResolveCause>) -> Self {
        Self::ResolutionFailed {
            model: model.canonical(),
            deployment: deployment.map(str::to_string),
            cause: cause.into(),
        }
    }

    pub fn cause(&self) -> &ResolveCause {
        match self {
            Self::ResolutionFailed { cause, .. } => cause,
        }
    }

    pub fn deployment(&self) -> Option<&str> {
        match self {
            Self::ResolutionFailed { deployment, .. } => deployment.as_deref(),
        }
    }
}

// ============================================================================
// Options and results
// ============================================================================

/// Where new deployments are created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentSettings {
    pub namespace: String,
    /// `{model}` is replaced by the canonical model name
    pub storage_uri: String,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            namespace: "staging".to_string(),
            storage_uri: "s3://models/{model}/".to_string(),
        }
    }
}

/// Local ports probed when a tunnel is needed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRange {
    pub start: u16,
    pub max_attempts: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: ports::DEFAULT_START_PORT,
            max_attempts: ports::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverOptions {
    pub deployment: DeploymentSettings,
    pub poll: PollConfig,
    pub ports: PortRange,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentOrigin {
    /// Reused a deployment that was already running
    Existing,
    /// Created and started during this resolution
    Provisioned,
}

/// A verified, locally reachable deployment
#[derive(Debug, Serialize)]
pub struct ResolvedDeployment {
    /// What the endpoint reports serving; the requested name if it wouldn't say
    pub verified_model_id: String,
    pub external_endpoint: String,
    pub internal_endpoint: String,
    pub deployment_id: String,
    pub status: DeploymentStatus,
    pub origin: DeploymentOrigin,
    pub deployed_at: String,
    /// Present when `external_endpoint` goes through a port forward
    #[serde(skip)]
    pub tunnel: Option<TunnelHandle>,
}

impl ResolvedDeployment {
    pub fn docs_url(&self) -> String {
        format!("{}/docs", self.external_endpoint.trim_end_matches('/'))
    }

    pub fn tunnelled(&self) -> bool {
        self.tunnel.is_some()
    }

    /// Tear down the port forward, if any
    pub async fn close(&mut self) -> Result<(), TunnelError> {
        match self.tunnel.as_mut() {
            Some(handle) => handle.close().await,
            None => Ok(()),
        }
    }
}

/// A locally reachable URL for a deployment's endpoint
struct Exposure {
    external_endpoint: String,
    tunnel: Option<TunnelHandle>,
}

impl Exposure {
    async fn discard(mut self) {
        if let Some(handle) = self.tunnel.as_mut() {
            if let Err(e) = handle.close().await {
                warn!("Failed to close port forward on {}: {}", handle.local_port, e);
            }
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

pub struct DeploymentResolver {
    client: Arc<dyn DeploymentClient>,
    tunnels: TunnelManager,
    verifier: EndpointVerifier,
    options: ResolverOptions,
}

impl DeploymentResolver {
    pub fn new(
        client: Arc<dyn DeploymentClient>,
        tunnels: TunnelManager,
        verifier: EndpointVerifier,
        options: ResolverOptions,
    ) -> Self {
        Self {
            client,
            tunnels,
            verifier,
            options,
        }
    }

    /// Find or create a running deployment of `model` and make it reachable.
    ///
    /// On failure nothing is returned and any tunnel opened along the way is
    /// closed again.
    pub async fn resolve(
        &self,
        model: &ModelRef,
        cancel: &CancellationToken,
    ) -> Result<ResolvedDeployment, ResolveError> {
        info!("Resolving deployment for {}", model);

        let deployments = self
            .call(cancel, "list_deployments", || self.client.list())
            .await
            .map_err(|cause| ResolveError::failed(model, None, cause))?;

        if let Some(resolved) = self.reuse_existing(model, &deployments, cancel).await? {
            return Ok(resolved);
        }

        info!("No running deployment of {} found, provisioning", model);
        self.provision(model, cancel).await
    }

    async fn reuse_existing(
        &self,
        model: &ModelRef,
        deployments: &[DeploymentRecord],
        cancel: &CancellationToken,
    ) -> Result<Option<ResolvedDeployment>, ResolveError> {
        for record in deployments.iter().filter(|d| d.is_serving()) {
            if !model.matches_path(&record.model_path) {
                debug!(
                    "Skipping deployment {}: serves {}",
                    record.id, record.model_path
                );
                continue;
            }
            if record.model_path != model.canonical() {
                warn!(
                    "Deployment {} matched {} by bare name only ({})",
                    record.id, model, record.model_path
                );
            }

            // is_serving guarantees an endpoint
            let Some(internal) = record.internal_endpoint.as_deref() else {
                continue;
            };
            info!("Found running deployment {} at {}", record.id, internal);

            let exposure = match self
                .expose(&record.id, record.model_name.as_deref(), internal, cancel)
                .await
            {
                Ok(exposure) => exposure,
                Err(ResolveCause::Cancelled) => {
                    return Err(ResolveError::failed(
                        model,
                        Some(record.id.as_str()),
                        ResolveCause::Cancelled,
                    ));
                }
                Err(cause) => {
                    warn!("Could not expose deployment {}: {}", record.id, cause);
                    continue;
                }
            };

            let resolved = self
                .finish(
                    model,
                    &record.id,
                    &record.model_path,
                    internal,
                    exposure,
                    DeploymentOrigin::Existing,
                    cancel,
                )
                .await?;
            return Ok(Some(ResolvedDeployment {
                deployed_at: record
                    .created_at
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                ..resolved
            }));
        }
        Ok(None)
    }

    async fn provision(
        &self,
        model: &ModelRef,
        cancel: &CancellationToken,
    ) -> Result<ResolvedDeployment, ResolveError> {
        let name = generate_deployment_name(model);
        let payload = DeploymentPayload::new(
            &name,
            model,
            &self.options.deployment.namespace,
            &self.options.deployment.storage_uri,
        );
        info!("Creating deployment {} for {}", name, model);

        let deployment_id = self
            .call(cancel, "create_deployment", || self.client.create(&payload))
            .await
            .map_err(|cause| ResolveError::failed(model, None, cause))?;
        info!("Created deployment {}", deployment_id);

        let fail =
            |cause: ResolveCause| ResolveError::failed(model, Some(deployment_id.as_str()), cause);

        self.call(cancel, "start_deployment", || self.client.start(&deployment_id))
            .await
            .map_err(fail)?;
        info!("Started deployment {}", deployment_id);

        let internal = poll_until_running(
            self.client.as_ref(),
            &deployment_id,
            &self.options.poll,
            cancel,
        )
        .await
        .map_err(|e| match e {
            PollError::Cancelled => fail(ResolveCause::Cancelled),
            other => fail(other.into()),
        })?;

        let exposure = self
            .expose(&deployment_id, Some(&name), &internal, cancel)
            .await
            .map_err(fail)?;

        let resolved = self
            .finish(
                model,
                &deployment_id,
                &name,
                &internal,
                exposure,
                DeploymentOrigin::Provisioned,
                cancel,
            )
            .await?;
        Ok(ResolvedDeployment {
            deployed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ..resolved
        })
    }

    /// Make `internal` reachable from this machine
    async fn expose(
        &self,
        deployment_id: &str,
        service_name: Option<&str>,
        internal: &str,
        cancel: &CancellationToken,
    ) -> Result<Exposure, ResolveCause> {
        if tunnel::is_loopback_endpoint(internal) {
            debug!("Endpoint {} is already local", internal);
            return Ok(Exposure {
                external_endpoint: internal.to_string(),
                tunnel: None,
            });
        }

        let service_name = service_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ResolveCause::MissingServiceName(deployment_id.to_string()))?;

        let port = ports::allocate(self.options.ports.start, self.options.ports.max_attempts)?;
        let handle = self
            .tunnels
            .open(service_name, internal, port, cancel)
            .await
            .map_err(|e| match e {
                TunnelError::Cancelled(_) => ResolveCause::Cancelled,
                other => other.into(),
            })?;

        Ok(Exposure {
            external_endpoint: handle.local_url(),
            tunnel: Some(handle),
        })
    }

    /// Verify the exposed endpoint and assemble the result. `working_name`
    /// is reported when the endpoint doesn't identify its model.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        model: &ModelRef,
        deployment_id: &str,
        working_name: &str,
        internal: &str,
        exposure: Exposure,
        origin: DeploymentOrigin,
        cancel: &CancellationToken,
    ) -> Result<ResolvedDeployment, ResolveError> {
        let verified = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            id = self.verifier.verify(&exposure.external_endpoint, working_name) => Some(id),
        };

        let Some(verified_model_id) = verified else {
            exposure.discard().await;
            return Err(ResolveError::failed(
                model,
                Some(deployment_id),
                ResolveCause::Cancelled,
            ));
        };

        Ok(ResolvedDeployment {
            verified_model_id,
            external_endpoint: exposure.external_endpoint,
            internal_endpoint: internal.to_string(),
            deployment_id: deployment_id.to_string(),
            status: DeploymentStatus::Running,
            origin,
            deployed_at: String::new(),
            tunnel: exposure.tunnel,
        })
    }

    /// One management-service call under the retry policy, abandoned on cancel
    async fn call<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        op: F,
    ) -> Result<T, ResolveCause>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModmanError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResolveCause::Cancelled),
            result = retry_with_backoff(&self.options.retry, operation, ModmanError::is_transient, op) => {
                result.map_err(ResolveCause::from)
            }
        }
    }
}
