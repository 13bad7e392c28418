//! PulseOne collector daemon.
//!
//! Boots the worker scheduling and protocol polling core (C1-C5), the
//! in-process half of the event dispatcher (C6), and the pub/sub half so a
//! single collector instance can also receive commands and hot-reload
//! signals addressed to it. Serves `/health` and `/status` over HTTP on a
//! separate port from any data-plane traffic, mirroring the teacher's
//! health-endpoint idiom.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PULSEONE_CONFIG` | - | Path to `config.toml` |
//! | `PULSEONE_HTTP_PORT` | `8080` | Health/status HTTP port |
//! | `PULSEONE_DATABASE_URL` | `sqlite://pulseone.db` | Relational store URL |
//! | `PULSEONE_REDIS_URL` | `redis://127.0.0.1:6379` | Cache/pub-sub store URL |
//! | `PULSEONE_EDGE_SERVER_ID` | unset | This collector's sharding key (spec §4.5) |
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

use pulse_collector::{MonitorConfig, WorkerFactory, WorkerMonitor, WorkerRegistry, WorkerScheduler};
use pulse_common::cache::{CacheStore, RedisCacheStore};
use pulse_common::events::BoundedEventQueue;
use pulse_common::logging::LogLevelHandle;
use pulse_config::loader::ConfigLoader;
use pulse_dispatch::{CspGateway, IngressDispatcher, PubSubDispatcher};
use pulse_export::ExportCoordinator;
use pulse_repository::RepositoryFactory;
use pulse_secrets::SecretService;

struct AppState {
    registry: Arc<WorkerRegistry>,
    gateway: Arc<CspGateway>,
    log_level: LogLevelHandle,
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = pulse_common::logging::init_logging("pulse-collectord");
    info!("starting pulse-collectord");

    let config_path = std::env::var("PULSEONE_CONFIG").ok();
    let loader = match &config_path {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("failed to load configuration")?;

    let repos = Arc::new(RepositoryFactory::connect(&config.database.url, config.database.max_connections).await.context("failed to connect to relational store")?);
    let cache: Arc<dyn CacheStore> = Arc::new(RedisCacheStore::connect(&config.redis.url).await.context("failed to connect to cache store")?);
    let secrets = Arc::new(SecretService::new(&config.secrets).await.context("failed to initialize secret service")?);

    let queue = Arc::new(BoundedEventQueue::new(10_000, 2_000));
    let registry = Arc::new(WorkerRegistry::new());
    let factory = WorkerFactory::new(Arc::clone(&repos), queue.clone());
    let scheduler = Arc::new(WorkerScheduler::new(Arc::clone(&registry), factory, Arc::clone(&repos), Arc::clone(&cache), config.collector.edge_server_id));

    let monitor_config = MonitorConfig { check_interval: Duration::from_secs(30), stuck_timeout: Duration::from_secs(config.collector.stuck_worker_grace_secs), enabled: true };
    let monitor = Arc::new(WorkerMonitor::new(Arc::clone(&scheduler), Arc::clone(&registry), monitor_config));

    let started = scheduler.start_all_active_workers().await;
    info!(started, collector_id = ?config.collector.edge_server_id, "started active workers");

    let coordinator = Arc::new(ExportCoordinator::new(
        Arc::clone(&repos),
        Arc::clone(&secrets),
        &config.export.failed_file_path,
        config.export.auto_cleanup_success_files,
        config.export.keep_failed_files_days,
        config.export.disk_retry_interval_secs,
    ));

    let collector_id_str = config.collector.edge_server_id.map(|id| id.to_string()).unwrap_or_else(|| "unassigned".to_string());
    let ingress = Arc::new(IngressDispatcher::new(queue, Arc::clone(&coordinator), Duration::from_millis(500)));
    let pubsub = Arc::new(PubSubDispatcher::new(&config.redis.url, Arc::clone(&repos), Arc::clone(&coordinator), Some(collector_id_str)));
    let gateway = Arc::new(CspGateway::new(Arc::clone(&coordinator), Some(ingress), pubsub));

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

    let monitor_handle = {
        let monitor = Arc::clone(&monitor);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = monitor.run() => {}
                _ = shutdown_rx.recv() => info!("worker monitor shutting down"),
            }
        })
    };

    let state = Arc::new(AppState { registry: Arc::clone(&registry), gateway: Arc::clone(&gateway), log_level });
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http.port));
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/admin/log-level", axum::routing::post(set_log_level_handler))
        .with_state(state);
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
    info!("shutdown signal received, stopping workers");
    scheduler.stop_all_workers().await;
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = gateway_handle.await;
        let _ = monitor_handle.await;
        let _ = http_handle.await;
    })
    .await;

    info!("pulse-collectord shutdown complete");
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "UP", "version": env!("CARGO_PKG_VERSION") }))
}

async fn status_handler(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Json<serde_json::Value> {
    let gateway_status = state.gateway.status().await;
    Json(serde_json::json!({
        "worker_count": state.registry.count(),
        "gateway": gateway_status,
    }))
}

/// Runtime log level control (SPEC_FULL.md §C.1 `LogLevelManager`): lets an
/// operator raise or lower verbosity without a restart.
async fn set_log_level_handler(axum::extract::State(state): axum::extract::State<Arc<AppState>>, body: String) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    match state.log_level.set(body.trim()) {
        Ok(()) => (axum::http::StatusCode::OK, Json(serde_json::json!({ "status": "ok", "level": body.trim() }))),
        Err(e) => (axum::http::StatusCode::BAD_REQUEST, Json(serde_json::json!({ "status": "error", "error": e }))),
    }
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
