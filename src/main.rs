use std::process;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use llmdeploy::cli::{self, Cli, Commands};
use llmdeploy::config::{self, Settings};

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Credentials must be in the environment before the tunnel config snapshots it
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = config::load_env_file(env_file) {
            error!("{}", e);
            process::exit(1);
        }
    }

    let settings = match cli::load_effective_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load settings: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(args.command, settings).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(command: Commands, settings: Settings) -> anyhow::Result<()> {
    match command {
        Commands::Resolve(args) => {
            let cancel = cancel_on_ctrl_c();
            let model = cli::target_model(&settings, &args.model, args.from_catalog).await?;
            let resolver = cli::build_resolver(&settings);

            let mut resolved = cli::resolve(&resolver, &model, &cancel).await?;
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&resolved).context("Failed to encode result")?
                );
            } else {
                print!("{}", cli::format_resolved(&resolved));
            }

            let forwarded_port = resolved.tunnel.as_ref().map(|t| t.local_port);
            match forwarded_port {
                Some(port) if args.hold => {
                    info!("Holding port forward on localhost:{}, press Ctrl-C to close", port);
                    cancel.cancelled().await;
                    resolved.close().await.context("Failed to close port forward")?;
                }
                // Detached process group: the forward keeps running after we exit
                Some(port) => info!("Port forward on localhost:{} left running", port),
                None => {}
            }
        }

        Commands::Ask(args) => {
            let cancel = cancel_on_ctrl_c();
            let model = cli::target_model(&settings, &args.model, args.from_catalog).await?;
            let resolver = cli::build_resolver(&settings);

            let mut resolved = cli::resolve(&resolver, &model, &cancel).await?;
            let client = cli::inference_client(&settings);
            let answer = cli::ask(&client, &resolved, &args.question).await;

            if let Err(e) = resolved.close().await {
                warn!("Failed to close port forward: {}", e);
            }
            print!("{}", cli::format_answer(&answer?));
        }

        Commands::List => {
            let deployments = cli::list_deployments(&settings).await?;
            print!("{}", cli::format_deployment_list(&deployments));
        }

        Commands::Catalog => {
            let models = cli::catalog_models(&settings).await?;
            print!("{}", cli::format_catalog(&models));
        }

        Commands::Config => {
            print!("{}", config::serialize_settings(&settings)?);
        }
    }

    Ok(())
}

/// Token cancelled on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}
