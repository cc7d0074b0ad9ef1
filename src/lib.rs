pub mod aggregator;
pub mod api;
pub mod cache;
pub mod clients;
pub mod config;
pub mod library;
pub mod lock;
pub mod matcher;
pub mod models;
pub mod parser;
pub mod processor;
pub mod resolver;
pub mod selector;
pub mod state;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use config::Config;
use state::SharedState;

#[derive(Parser)]
#[command(name = "streamarr", about = "Stream aggregation engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Validate the config and probe every configured service.
    Check,
    /// Write a default config.toml next to the binary.
    Init,
}

pub async fn run() -> anyhow::Result<()> {
    let config = Config::load()?;
    run_with_config(config).await
}

pub async fn run_with_config(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let prometheus_handle = init_prometheus(&config)?;
    init_logging(&config)?;

    let cli = Cli::parse();
    match cli.command {
        None => run_daemon(config, prometheus_handle).await,
        Some(Commands::Check) => run_check(config).await,
        Some(Commands::Init) => {
            Config::create_default_if_missing()?;
            println!("✓ Config file created. Edit config.toml and run again.");
            Ok(())
        }
    }
}

fn init_prometheus(
    config: &Config,
) -> anyhow::Result<Option<metrics_exporter_prometheus::PrometheusHandle>> {
    if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        info!("Prometheus metrics recorder initialized");
        Ok(Some(handle))
    } else {
        Ok(None)
    }
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let mut log_level = config.general.log_level.clone();
    if config.general.suppress_connection_errors {
        log_level.push_str(",reqwest::retry=off,hyper_util=off");
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let use_json = config.observability.loki_enabled
        || std::env::var("LOG_FORMAT").unwrap_or_default() == "json";

    if use_json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false);

        if config.observability.loki_enabled {
            let url =
                url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

            let (loki_layer, task) = tracing_loki::builder()
                .label("app", "streamarr")?
                .extra_field("version", env!("CARGO_PKG_VERSION"))?
                .build_url(url)?;

            tokio::spawn(task);
            registry.with(fmt_layer).with(loki_layer).init();
            info!(
                "Loki logging initialized at {}",
                config.observability.loki_url
            );
        } else {
            registry.with(fmt_layer).init();
        }
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().pretty();
        registry.with(fmt_layer).init();
    }
    Ok(())
}

async fn run_daemon(
    config: Config,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> anyhow::Result<()> {
    info!(
        "streamarr v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let port = config.server.port;
    let shared = Arc::new(SharedState::new(config)?);
    let api_state = api::create_app_state(Arc::clone(&shared), prometheus_handle);

    let app = api::router(api_state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let server_handle = tokio::spawn(async move {
        info!("🌐 API running at http://{addr}");
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {e}");
        }
    });

    info!("Daemon running. Press Ctrl+C to stop.");
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Error listening for shutdown: {e}"),
    }

    server_handle.abort();
    info!("Daemon stopped");
    Ok(())
}

/// Validates the config and probes each configured service with a cheap
/// list call.
async fn run_check(config: Config) -> anyhow::Result<()> {
    let shared = SharedState::new(config)?;

    if shared.services.is_empty() {
        println!("No services configured.");
        return Ok(());
    }

    for (id, service) in &shared.services {
        let caps = service.capabilities();
        let probe = if caps.torrent {
            service
                .library_snapshot(crate::models::SourceKind::Torrent)
                .await
                .map(|items| items.len())
        } else {
            service
                .library_snapshot(crate::models::SourceKind::Usenet)
                .await
                .map(|items| items.len())
        };
        match probe {
            Ok(count) => println!("✓ {id}: reachable ({count} items in library)"),
            Err(e) => println!("✗ {id}: {e}"),
        }
    }
    Ok(())
}
