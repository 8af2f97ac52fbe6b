//! CLI module for llmdeploy
//!
//! Subcommands:
//! - `llmdeploy resolve` - Find or provision a deployment and expose it locally
//! - `llmdeploy ask` - Resolve a model and send it one question
//! - `llmdeploy list` - List deployments known to the management service
//! - `llmdeploy catalog` - List models offered by the catalog
//! - `llmdeploy config` - Print the effective settings

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "llmdeploy")]
#[command(about = "Resolve LLM deployments to verified, locally reachable endpoints")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to settings file (default: ~/.llmdeploy/config.yaml)
    #[arg(long, global = true, env = "LLMDEPLOY_CONFIG")]
    pub config: Option<String>,

    /// Path to a .env file with cluster credentials
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    /// Override the deployment management service URL
    #[arg(long, value_name = "URL", global = true, env = "LLMDEPLOY_SERVICE_URL")]
    pub service_url: Option<String>,

    /// Override the model catalog URL
    #[arg(long, value_name = "URL", global = true, env = "LLMDEPLOY_CATALOG_URL")]
    pub catalog_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find or provision a deployment and expose it locally
    Resolve(ResolveArgs),

    /// Resolve a model and ask it one question
    Ask(AskArgs),

    /// List deployments known to the management service
    #[command(visible_alias = "ls")]
    List,

    /// List models offered by the catalog
    Catalog,

    /// Print the effective settings as YAML
    Config,
}

/// Arguments for the resolve command
#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Model to resolve, e.g. "meta/Llama-3.1-8B-Instruct"
    pub model: String,

    /// Look the model up in the catalog before resolving
    #[arg(long)]
    pub from_catalog: bool,

    /// Keep the port forward open until Ctrl-C
    #[arg(long)]
    pub hold: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the ask command
#[derive(Parser, Debug)]
pub struct AskArgs {
    /// Model to resolve, e.g. "Qwen/Qwen2.5-0.5B-Instruct"
    pub model: String,

    /// Question to send
    pub question: String,

    /// Look the model up in the catalog before resolving
    #[arg(long)]
    pub from_catalog: bool,
}
