use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gatehouse::admission::{AdmissionPipeline, PolicyName, PolicySet};
use gatehouse::config::{GatehouseConfig, LogFormat, LoggingConfig};
use gatehouse::gateway::{
    Downstream, GatewayService, HttpServer, IdentityOptions, LocalResponder, UpstreamForwarder,
};

/// Request admission gateway.
#[derive(Debug, Parser)]
#[command(name = "gatehouse", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.listen_addr`
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Upstream `host:port`, overrides `server.upstream`
    #[arg(long)]
    upstream: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        GatehouseConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if let Some(upstream) = cli.upstream {
        config.server.upstream = Some(upstream);
    }

    init_tracing(&config.logging);

    info!("Starting Gatehouse admission gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let policies =
        PolicySet::from_config(&config.admission).context("invalid admission configuration")?;
    let identity =
        IdentityOptions::from_config(&config.server).context("invalid server configuration")?;

    for name in PolicyName::ALL {
        info!(policy = %name, options = ?policies.options(name), "Policy configured");
    }
    for route in policies.routes() {
        info!(
            prefix = %route.prefix,
            policy = route.policy.map(|p| p.as_str()).unwrap_or("none"),
            "Route bound"
        );
    }

    if cli.check_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let pipeline = Arc::new(AdmissionPipeline::new(policies));

    let cleanup = (config.admission.cleanup_interval_secs > 0).then(|| {
        pipeline.registry().spawn_cleanup(
            Duration::from_secs(config.admission.cleanup_interval_secs),
            Duration::from_secs(config.admission.idle_timeout_secs),
        )
    });

    let downstream: Arc<dyn Downstream> = match &config.server.upstream {
        Some(upstream) => {
            let forwarder = UpstreamForwarder::new(upstream);
            info!(upstream = %forwarder.origin(), "Forwarding admitted requests");
            Arc::new(forwarder)
        }
        None => {
            info!("No upstream configured, answering admitted requests locally");
            Arc::new(LocalResponder::new())
        }
    };

    let service = Arc::new(GatewayService::new(pipeline, downstream, identity));
    let server = HttpServer::bind(config.server.listen_addr, service)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;

    server.serve_with_shutdown(shutdown_signal()).await?;

    if let Some(handle) = cleanup {
        handle.abort();
    }

    info!("Gatehouse stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
