//! NSP Fault Gateway
//!
//! Single-binary Rust service that:
//! 1. Authenticates against the NSP REST gateway and keeps the token fresh
//! 2. Subscribes to NSP fault notifications and keeps the subscription alive
//! 3. Consumes the notification topic from Kafka over mutual TLS
//! 4. Appends every event to a JSON Lines log
//!
//! A small admin listener exposes health, status, event log stats and
//! Prometheus metrics.

mod admin;
mod config;
mod error;
mod metrics;
mod orchestrator;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use event_stream::KafkaConnector;
use nsp_auth::HttpAuthApi;
use nsp_subscription::HttpSubscriptionApi;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::orchestrator::{Components, Orchestrator, SHUTDOWN_STEP_TIMEOUT, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting nsp-fault-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        api_base_url = %config.api.base_url,
        subscription_base_url = %config.subscription.base_url,
        brokers = %config.kafka.brokers,
        category = %config.subscription.category,
        export_path = %config.export.path.display(),
        admin_addr = %config.admin.listen_addr,
        "configuration loaded"
    );

    let components = build_components(&config)?;
    let settings = Settings {
        refresh_interval: config.refresh_interval(),
        renewal_interval: config.renewal_interval(),
        subscription_ttl: config.subscription_ttl(),
        category: config.subscription.category.clone(),
        property_filter: config.subscription.property_filter.clone(),
        export_path: config.export.path.clone(),
        sync_each_write: config.export.sync_each_write,
    };

    let (listener, orchestrator) =
        bind_and_start(config.admin.listen_addr, components, settings).await?;
    info!(addr = %config.admin.listen_addr, "admin listener ready");

    let app = build_admin_router(AdminState::new(orchestrator.clone(), prometheus_handle));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    // The admin listener keeps answering /health while cleanup runs
    orchestrator.shutdown().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(SHUTDOWN_STEP_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "admin server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "admin server task panicked"),
        Err(_) => warn!("admin server did not drain in time"),
    }

    info!("shutdown complete");
    Ok(())
}

/// Bind the admin listener, then bring the agent up. A taken admin port
/// fails here before any token or subscription exists on NSP.
async fn bind_and_start(
    admin_addr: SocketAddr,
    components: Components,
    settings: Settings,
) -> Result<(TcpListener, Arc<Orchestrator>)> {
    let listener = TcpListener::bind(admin_addr)
        .await
        .with_context(|| format!("failed to bind admin listener to {admin_addr}"))?;
    let orchestrator = Orchestrator::start(components, settings)
        .await
        .context("startup failed")?;
    Ok((listener, orchestrator))
}

/// Build the HTTP clients and Kafka connector from configuration.
fn build_components(config: &Config) -> Result<Components> {
    let mut builder = reqwest::Client::builder().timeout(config.request_timeout());
    if config.api.accept_invalid_certs {
        warn!(
            api_base_url = %config.api.base_url,
            "TLS certificate verification disabled for the NSP REST API"
        );
        builder = builder.danger_accept_invalid_certs(true);
    }
    let http = builder.build().context("failed to build HTTP client")?;

    let password = config
        .api
        .password
        .as_ref()
        .context("API password not configured")?;

    Ok(Components {
        auth_api: Arc::new(HttpAuthApi::new(
            http.clone(),
            &config.api.base_url,
            &config.api.username,
            password,
        )),
        subscription_api: Arc::new(HttpSubscriptionApi::new(http, &config.subscription.base_url)),
        connector: Arc::new(KafkaConnector::new(config.kafka_settings())),
    })
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::testing::{Fakes, settings, wait_for_processed};

    #[tokio::test]
    async fn taken_admin_port_fails_before_any_nsp_call() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = occupied.local_addr().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let fakes = Fakes::new(&[]);

        let err = bind_and_start(addr, fakes.components(), settings(dir.path()))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("admin listener"), "got: {err}");
        assert!(fakes.entries().is_empty(), "entries: {:?}", fakes.entries());
    }

    #[tokio::test]
    async fn free_admin_port_binds_and_starts() {
        let dir = tempfile::tempdir().unwrap();
        let fakes = Fakes::new(&[]);

        let (listener, orchestrator) = bind_and_start(
            "127.0.0.1:0".parse().unwrap(),
            fakes.components(),
            settings(dir.path()),
        )
        .await
        .unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
        assert!(orchestrator.is_running());

        wait_for_processed(&orchestrator, 0).await;
        orchestrator.shutdown().await;
    }
}
