use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tfrelay_domain::config::ConfigSeverity;
use tfrelay_domain::Config;
use tfrelay_gateway::cli::{load_config, Cli, Command, ConfigCommand};
use tfrelay_gateway::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Run { config: None }) => {
            init_tracing();
            let (config, _path) = load_config(None)?;
            run(Arc::new(config)).await
        }
        Some(Command::Run { config: Some(path) }) => {
            init_tracing();
            let (config, _path) = load_config(Some(&path))?;
            run(Arc::new(config)).await
        }
        Some(Command::Doctor) => {
            let (config, config_path) = load_config(None)?;
            let passed = tfrelay_gateway::cli::doctor::run(&config, &config_path).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = load_config(None)?;
            if !tfrelay_gateway::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = load_config(None)?;
            tfrelay_gateway::cli::config::show(&config);
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tfrelay_gateway=debug")),
        )
        .json()
        .init();
}

/// Starts the cache server, reports the environment variables a downstream
/// provisioning tool should be launched with, and blocks until a shutdown
/// signal arrives.
async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("tfrelay starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let bound = server::listen(config).await?;
    let endpoint = format!("http://{}", bound.addr);
    tracing::info!(%endpoint, "bound — launch the downstream tool with PROVIDER_CACHE_ENDPOINT set to this value");
    println!("PROVIDER_CACHE_ENDPOINT={endpoint}");

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown_cancel.cancel();
    });

    bound.run(cancel).await
}
