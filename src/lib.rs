//! llmdeploy: resolve a model to a verified, locally reachable inference
//! endpoint, reusing a running deployment or provisioning a new one.

pub mod cli;
pub mod client;
pub mod config;
pub mod model;
pub mod resolver;
pub mod retry;
pub mod tunnel;

pub use model::ModelRef;
pub use resolver::{DeploymentResolver, ResolveError, ResolvedDeployment};
