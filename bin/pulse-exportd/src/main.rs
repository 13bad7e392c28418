//! PulseOne export gateway daemon.
//!
//! Standalone deployment of the export path (C6's out-of-process ingress
//! plus C7-C9): no local workers, no in-process event queue — every alarm
//! and value update arrives over the cache store's pub/sub channels. Useful
//! when export load needs to scale independently of polling load; a
//! single-node deployment can instead let `pulse-collectord` run its own
//! embedded dispatcher and skip this binary entirely.
//!
//! Grounded in the original's `main.cpp` boot sequence (load config, init
//! DB, init secret manager, init targets, start dispatcher, serve status)
//! via the `CspGateway` facade (SPEC_FULL.md §C.5).
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PULSEONE_CONFIG` | - | Path to `config.toml` |
//! | `PULSEONE_HTTP_PORT` | `8080` | Health/status HTTP port |
//! | `PULSEONE_DATABASE_URL` | `sqlite://pulseone.db` | Relational store URL |
//! | `PULSEONE_REDIS_URL` | `redis://127.0.0.1:6379` | Cache/pub-sub store URL |
//! | `RUST_LOG` | `info` | Log level |
//! | `LOG_FORMAT` | text | `json` for structured logs |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

use pulse_config::loader::ConfigLoader;
use pulse_dispatch::{CspGateway, PubSubDispatcher};
use pulse_export::ExportCoordinator;
use pulse_repository::RepositoryFactory;
use pulse_secrets::SecretService;

struct AppState {
    gateway: Arc<CspGateway>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_level = pulse_common::logging::init_logging("pulse-exportd");
    info!("starting pulse-exportd");

    let config_path = std::env::var("PULSEONE_CONFIG").ok();
    let loader = match &config_path {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("failed to load configuration")?;

    let repos = Arc::new(RepositoryFactory::connect(&config.database.url, config.database.max_connections).await.context("failed to connect to relational store")?);
    let secrets = Arc::new(SecretService::new(&config.secrets).await.context("failed to initialize secret service")?);

    let coordinator = Arc::new(ExportCoordinator::new(
        Arc::clone(&repos),
        Arc::clone(&secrets),
        &config.export.failed_file_path,
        config.export.auto_cleanup_success_files,
        config.export.keep_failed_files_days,
        config.export.disk_retry_interval_secs,
    ));

    let pubsub = Arc::new(PubSubDispatcher::new(&config.redis.url, Arc::clone(&repos), Arc::clone(&coordinator), None));
    let gateway = Arc::new(CspGateway::new(Arc::clone(&coordinator), None, pubsub));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let gateway_handle = {
        let gateway = Arc::clone(&gateway);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = gateway.run() => {}
                _ = shutdown_rx.recv() => info!("dispatch gateway shutting down"),
            }
        })
    };

    let state = Arc::new(AppState { gateway: Arc::clone(&gateway) });
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http.port));
    let app = Router::new().route("/health", get(health_handler)).route("/status", get(status_handler)).with_state(state);
    let listener = tokio::net::TcpListener::bind(http_addr).await.context("failed to bind health/status listener")?;
    info!(%http_addr, "health/status endpoint listening");

    let http_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        })
    };

    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = gateway_handle.await;
        let _ = http_handle.await;
    })
    .await;

    info!("pulse-exportd shutdown complete");
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "UP", "version": env!("CARGO_PKG_VERSION") }))
}

async fn status_handler(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "gateway": state.gateway.status().await }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to install signal handler").recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
