use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use brain_core::api;
use brain_core::bootstrap::{build_state, spawn_background, Collaborators};
use brain_domain::config::{BrainConfig, ConfigSeverity};

#[derive(Parser)]
#[command(name = "darwin-brain", about = "Multi-agent orchestrator for autonomous cloud-ops")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the brain (default).
    Serve,
    /// Configuration utilities.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective configuration.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = BrainConfig::load(config_path)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config { command }) => {
            let config = BrainConfig::load(config_path)?;
            match command {
                ConfigCommand::Validate => {
                    let issues = config.validate();
                    for issue in &issues {
                        println!("{issue}");
                    }
                    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                        std::process::exit(1);
                    }
                    println!("config ok ({} warning(s))", issues.len());
                    Ok(())
                }
                ConfigCommand::Show => {
                    println!("{}", toml::to_string_pretty(&config)?);
                    Ok(())
                }
            }
        }
        Some(Command::Version) => {
            println!("darwin-brain {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,brain_core=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<BrainConfig>) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "darwin-brain starting");

    let bind = config.server.bind.clone();
    let state = build_state(config, Collaborators::default())?;

    let shutdown = Arc::new(tokio::sync::Notify::new());
    spawn_background(&state, shutdown.clone());

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(bind = %bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.notify_waiters();
        })
        .await?;
    Ok(())
}
