use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fc_domain::config::{Config, ConfigSeverity};
use fc_engine::cli::{Cli, Command, ConfigCommand};
use fc_engine::{api, bootstrap};
use fc_transport::memory::InMemoryConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = fc_engine::cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = fc_engine::cli::load_config()?;
            if !fc_engine::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = fc_engine::cli::load_config()?;
            fc_engine::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("fancast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fc_engine=debug")),
        )
        .json()
        .init();
}

/// Start the engine and the admin API with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Fancast starting");

    // ── Config validation ────────────────────────────────────────────
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
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Transport connector ──────────────────────────────────────────
    // The platform client is an external collaborator; deployments plug in
    // an adapter crate implementing `TransportConnector`. Without one, the
    // daemon runs against the in-memory transport.
    tracing::warn!(
        "no platform transport adapter compiled in — running with the in-memory transport"
    );
    let connector = InMemoryConnector::new();

    // ── Engine ───────────────────────────────────────────────────────
    let state = bootstrap::start(config.clone(), connector)
        .await
        .context("starting engine")?;
    tracing::info!("engine started");

    // ── Admin API ────────────────────────────────────────────────────
    let max_concurrent = std::env::var("FC_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(64);

    let app = api::router(state.clone())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "Fancast admin API listening");

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown_state.stop();
        })
        .await
        .context("admin API server error")?;

    state.stop();
    Ok(())
}
