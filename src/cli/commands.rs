//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, printing is handled by the caller

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Cli;
use crate::client::catalog::{select_model, CatalogClient, CatalogError, CatalogModel};
use crate::client::modman::{DeploymentClient, HttpDeploymentClient, ModmanError};
use crate::client::openai::{
    ChatCompletionRequest, ClientError, OpenAiClient, OpenAiClientTrait,
};
use crate::config::{self, ConfigError, Settings};
use crate::model::{DeploymentRecord, ModelRef};
use crate::resolver::{DeploymentResolver, EndpointVerifier, ResolveError, ResolvedDeployment};
use crate::tunnel::TunnelManager;

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid model reference: {0}")]
    InvalidModel(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Service(#[from] ModmanError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Inference failed: {0}")]
    Inference(#[from] ClientError),

    #[error("Endpoint returned no answer")]
    EmptyAnswer,
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Settings (Pure business logic)
// ============================================================================

/// Apply command-line overrides on top of file settings
pub fn apply_overrides(mut settings: Settings, cli: &Cli) -> Settings {
    if let Some(ref url) = cli.service_url {
        settings.service_url = url.clone();
    }
    if let Some(ref url) = cli.catalog_url {
        settings.catalog_url = url.clone();
    }
    settings
}

/// Load the settings file named on the command line (or the default one)
/// and apply overrides
pub fn load_effective_settings(cli: &Cli) -> CommandResult<Settings> {
    let settings = match cli.config.as_deref() {
        Some(path) => config::load_settings_from(&config::expand_path(path))?,
        None => config::load_settings()?,
    };
    Ok(apply_overrides(settings, cli))
}

pub fn parse_model(raw: &str) -> CommandResult<ModelRef> {
    raw.parse().map_err(CommandError::InvalidModel)
}

// ============================================================================
// Wiring
// ============================================================================

pub fn deployment_client(settings: &Settings) -> HttpDeploymentClient {
    HttpDeploymentClient::new(&settings.service_url).with_timeout(settings.timeouts.service)
}

pub fn inference_client(settings: &Settings) -> OpenAiClient {
    OpenAiClient::new(settings.api_key.clone())
        .with_timeouts(settings.timeouts.verify, settings.timeouts.inference)
}

/// Resolver backed by the real management service and `kubectl`. The
/// forwarding process receives a snapshot of the current environment.
pub fn build_resolver(settings: &Settings) -> DeploymentResolver {
    let tunnels = TunnelManager::with_child_processes(settings.tunnel.clone().with_process_env());
    let verifier = EndpointVerifier::new(Arc::new(inference_client(settings)))
        .with_timeout(settings.timeouts.verify);

    DeploymentResolver::new(
        Arc::new(deployment_client(settings)),
        tunnels,
        verifier,
        settings.resolver_options(),
    )
}

// ============================================================================
// Commands
// ============================================================================

/// Model to resolve, optionally confirmed against the catalog
pub async fn target_model(
    settings: &Settings,
    raw: &str,
    from_catalog: bool,
) -> CommandResult<ModelRef> {
    let model = parse_model(raw)?;
    if !from_catalog {
        return Ok(model);
    }

    let models = catalog_models(settings).await?;
    let entry = select_model(&models, &model.canonical())?;
    info!(
        "Selected {} from catalog (provider: {})",
        entry.model_ref(),
        entry.provider.as_deref().unwrap_or("unknown")
    );
    Ok(entry.model_ref())
}

pub async fn resolve(
    resolver: &DeploymentResolver,
    model: &ModelRef,
    cancel: &CancellationToken,
) -> CommandResult<ResolvedDeployment> {
    Ok(resolver.resolve(model, cancel).await?)
}

pub async fn list_deployments(settings: &Settings) -> CommandResult<Vec<DeploymentRecord>> {
    Ok(deployment_client(settings).list().await?)
}

pub async fn catalog_models(settings: &Settings) -> CommandResult<Vec<CatalogModel>> {
    let client = CatalogClient::new(&settings.catalog_url, settings.timeouts.service);
    Ok(client.fetch_models().await?)
}

/// One answered question
#[derive(Debug, Clone)]
pub struct Answer {
    pub model: String,
    pub question: String,
    pub text: String,
    pub latency: Duration,
    pub total_tokens: Option<u32>,
}

/// Send `question` to a resolved deployment, addressing it by the model id
/// it reported
pub async fn ask(
    client: &dyn OpenAiClientTrait,
    deployment: &ResolvedDeployment,
    question: &str,
) -> CommandResult<Answer> {
    let request = ChatCompletionRequest::question(&deployment.verified_model_id, question);

    let started = Instant::now();
    let response = client
        .chat_completion(&deployment.external_endpoint, &request)
        .await?;
    let latency = started.elapsed();

    let text = response
        .answer()
        .map(str::to_string)
        .ok_or(CommandError::EmptyAnswer)?;

    Ok(Answer {
        model: deployment.verified_model_id.clone(),
        question: question.to_string(),
        text,
        latency,
        total_tokens: response.usage.as_ref().map(|u| u.total_tokens),
    })
}
