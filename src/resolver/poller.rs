//! Deployment status polling
//!
//! ```text
//!            ┌─────────┐  Running + endpoint   ┌────────────┐
//!  start ──▶ │ Polling │ ────────────────────▶ │ Running(E) │
//!            └─────────┘                       └────────────┘
//!             │  ▲   │   Failed / Error        ┌────────────┐
//!             │  └───┘ ───────────────────────▶│ Failed(d)  │
//!             │ other status,                  └────────────┘
//!             │ transport error                ┌────────────┐
//!             └──── attempts exhausted ───────▶│ TimedOut   │
//!                                              └────────────┘
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::modman::{DeploymentClient, ModmanError};
use crate::model::DeploymentRecord;

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Deployment {deployment_id} failed: {details}")]
    DeploymentFailed {
        deployment_id: String,
        details: String,
    },

    #[error("Deployment {deployment_id} did not become ready after {} seconds ({attempts} attempts)", .budget.as_secs())]
    DeploymentTimeout {
        deployment_id: String,
        attempts: u32,
        budget: Duration,
    },

    #[error("Failed to check deployment status: {0}")]
    ServiceUnavailable(#[source] ModmanError),

    #[error("Polling cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub max_attempts: u32,
    /// Wait between attempts
    #[serde(rename = "interval_secs", with = "crate::config::secs")]
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_secs(10),
        }
    }
}

impl PollConfig {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Overall wait budget, independent of per-call timeouts
    pub fn budget(&self) -> Duration {
        self.interval
            .checked_mul(self.max_attempts)
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PollState {
    Polling,
    Running(String),
    Failed(String),
    TimedOut,
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Next state after observing `record`
fn transition(record: &DeploymentRecord) -> PollState {
    match &record.internal_endpoint {
        Some(endpoint) if record.status == crate::model::DeploymentStatus::Running => {
            PollState::Running(endpoint.clone())
        }
        _ if record.status.is_failure() => {
            PollState::Failed(record.details.clone().unwrap_or_default())
        }
        _ => PollState::Polling,
    }
}

// ============================================================================
// Polling loop
// ============================================================================

/// Poll `deployment_id` until it runs, fails, or the attempt budget runs out.
///
/// Returns the deployment's internal endpoint. A transport error on one
/// attempt is logged and polling continues, unless it was the final attempt.
pub async fn poll_until_running(
    client: &dyn DeploymentClient,
    deployment_id: &str,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<String, PollError> {
    info!("Monitoring deployment {} status", deployment_id);

    let mut state = PollState::Polling;
    let mut attempt = 0u32;

    while state == PollState::Polling {
        if attempt >= config.max_attempts {
            state = PollState::TimedOut;
            break;
        }
        attempt += 1;

        let observed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            observed = client.get_status(deployment_id) => observed,
        };

        match observed {
            Ok(record) => {
                info!(
                    "Status: {} (attempt {}/{})",
                    record.status, attempt, config.max_attempts
                );
                state = transition(&record);
            }
            Err(e) if attempt >= config.max_attempts => {
                return Err(PollError::ServiceUnavailable(e));
            }
            Err(e) => {
                warn!(
                    "Failed to check deployment status (attempt {}/{}): {}",
                    attempt, config.max_attempts, e
                );
            }
        }

        if state == PollState::Polling && attempt < config.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(config.interval) => {}
            }
        }
    }

    match state {
        PollState::Running(endpoint) => {
            info!("Deployment is running at: {}", endpoint);
            Ok(endpoint)
        }
        PollState::Failed(details) => Err(PollError::DeploymentFailed {
            deployment_id: deployment_id.to_string(),
            details,
        }),
        PollState::Polling | PollState::TimedOut => Err(PollError::DeploymentTimeout {
            deployment_id: deployment_id.to_string(),
            attempts: attempt,
            budget: config.budget(),
        }),
    }
}
