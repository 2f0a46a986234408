//! Oculus Agent Binary Entry Point
//!
//! Runs the agent runtime until Ctrl-C or SIGTERM.
//! Core functionality is provided by the `oculus_agent` library crate.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use oculus_agent::{
    Agent, AgentConfig,
    config::{DEFAULT_LOG_FILTER, parse_duration},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Oculus Agent - Telemetry Agent Runtime
#[derive(Parser, Debug)]
#[command(name = "oculus-agent", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long, env = "OCULUS_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Tracing filter (overrides config file; RUST_LOG takes precedence)
    #[arg(long, env = "OCULUS_AGENT_LOG")]
    log_filter: Option<String>,

    /// Publish interval, e.g. "2s" (overrides config file)
    #[arg(long, value_parser = parse_duration)]
    publish_interval: Option<Duration>,

    /// Agent property as key=value (repeatable)
    #[arg(short, long = "property", value_parser = parse_property)]
    properties: Vec<(String, String)>,
}

fn parse_property(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.trim().is_empty() {
        return Err("property key must not be empty".to_string());
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration before logging so its filter can apply
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(filter) = cli.log_filter {
        config.logging.filter = filter;
    }
    if let Some(interval) = cli.publish_interval {
        config.publisher.interval = interval;
    }
    config.properties.extend(cli.properties);
    config.validate()?;

    // Initialize tracing
    let fallback = if config.logging.filter.is_empty() {
        DEFAULT_LOG_FILTER.to_string()
    } else {
        config.logging.filter.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Oculus Agent {}", oculus_agent::agent::VERSION);
    match &cli.config {
        Some(path) => tracing::info!("Configuration loaded from: {}", path.display()),
        None => tracing::info!("No configuration file given, using defaults"),
    }
    tracing::info!(
        "Publish every {:?}, tick {:?}, batch limit {} bytes",
        config.publisher.interval,
        config.scheduler.tick,
        config.publisher.size_limit,
    );

    let agent = Agent::builder(config).build()?;
    agent.start()?;

    shutdown_signal().await;

    tracing::info!("Shutting down...");
    // The agent joins its threads; keep that off the async workers
    let agent = tokio::task::spawn_blocking(move || {
        agent.stop();
        agent
    })
    .await?;
    tracing::info!("Final bucket state:\n{}", agent.describe());
    tracing::info!("Oculus Agent stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
