//! PulseOne development/test CLI harness (spec §6 CLI surface).
//!
//! Runs the full collector + export-gateway monolith in one process by
//! default (`--daemon`), or drives one of the manual export test modes
//! against a configured database without standing up any workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pulse_collector::{MonitorConfig, WorkerFactory, WorkerMonitor, WorkerRegistry, WorkerScheduler};
use pulse_common::cache::{CacheStore, RedisCacheStore};
use pulse_common::events::BoundedEventQueue;
use pulse_common::{Alarm, AlarmStatus, RawValue, TimestampedValue};
use pulse_config::loader::ConfigLoader;
use pulse_dispatch::{CspGateway, IngressDispatcher, PubSubDispatcher};
use pulse_export::ExportCoordinator;
use pulse_repository::RepositoryFactory;
use pulse_secrets::SecretService;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pulse-dev", version, about = "PulseOne development/test CLI harness")]
struct Args {
    /// Path to config.toml (falls back to the usual search path, then defaults).
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Run the collector + export gateway monolith (default when no test mode is given).
    #[arg(long)]
    daemon: bool,

    /// Drop into an interactive prompt for manual device/export inspection.
    #[arg(long)]
    interactive: bool,

    /// Send one synthetic alarm through the export coordinator.
    #[arg(long)]
    test_alarm: bool,

    /// Send alarms for several distinct sites to exercise multi-target fan-out.
    #[arg(long)]
    test_multi: bool,

    /// Push several value events through the coordinator to exercise batching.
    #[arg(long)]
    test_batch: bool,

    /// Test connectivity to every configured, enabled export target.
    #[arg(long)]
    test_connection: bool,

    /// Run every test mode in sequence.
    #[arg(long)]
    test_all: bool,

    /// Retry and prune the failed-alarm disk queue, then exit.
    #[arg(long)]
    cleanup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_level = pulse_common::logging::init_logging("pulse-dev");
    let args = Args::parse();

    let loader = match &args.config {
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

    let any_test_mode = args.test_alarm || args.test_multi || args.test_batch || args.test_connection || args.test_all || args.cleanup || args.interactive;

    if args.test_all || args.test_alarm {
        run_test_alarm(&coordinator).await;
    }
    if args.test_all || args.test_multi {
        run_test_multi(&coordinator).await;
    }
    if args.test_all || args.test_batch {
        run_test_batch(&coordinator).await;
    }
    if args.test_all || args.test_connection {
        run_test_connection(&coordinator, &repos).await;
    }
    if args.cleanup {
        info!("running disk-queue retry and prune, then exiting");
        coordinator.retry_disk_queue_once().await;
    }
    if args.interactive {
        run_interactive(&coordinator, &repos).await;
    }

    if args.daemon || !any_test_mode {
        run_daemon(config, repos, secrets, coordinator).await?;
    }

    Ok(())
}

fn sample_alarm(site_id: i64) -> Alarm {
    Alarm {
        site_id,
        point_id: None,
        point_name: Some("pulse-dev test point".into()),
        description: Some("synthetic alarm raised by pulse-dev".into()),
        measured_value: RawValue::Float(99.9),
        timestamp: chrono::Utc::now(),
        alarm_flag: true,
        status: AlarmStatus::Alert,
        manual_override: false,
        extra_info: None,
        custom_vars: HashMap::new(),
    }
}

async fn run_test_alarm(coordinator: &ExportCoordinator) {
    info!("test-alarm: dispatching one synthetic alarm");
    coordinator.dispatch_alarm(sample_alarm(1)).await;
}

async fn run_test_multi(coordinator: &ExportCoordinator) {
    info!("test-multi: dispatching alarms across several sites");
    for site_id in 1..=3 {
        coordinator.dispatch_alarm(sample_alarm(site_id)).await;
    }
}

async fn run_test_batch(coordinator: &ExportCoordinator) {
    info!("test-batch: pushing several value events to exercise batching");
    for i in 0..5 {
        let value = TimestampedValue { point_id: i, value: RawValue::Float(i as f64), quality: pulse_common::Quality::Good, timestamp: chrono::Utc::now(), sequence: i as u64 };
        coordinator.dispatch_value(1, value).await;
    }
    coordinator.flush_timed_out_batches().await;
}

async fn run_test_connection(coordinator: &ExportCoordinator, repos: &RepositoryFactory) {
    info!("test-connection: testing every enabled export target");
    for target in repos.export_targets.find_all().await {
        if !target.enabled {
            continue;
        }
        match coordinator.test_target_connection(&target).await {
            Ok(()) => info!(target = %target.name, "connection test succeeded"),
            Err(e) => info!(target = %target.name, error = %e, "connection test failed"),
        }
    }
}

async fn run_interactive(coordinator: &ExportCoordinator, repos: &RepositoryFactory) {
    use std::io::Write;
    println!("pulse-dev interactive mode. Commands: alarm <site_id>, targets, quit");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("quit") | Some("exit") => break,
            Some("alarm") => {
                let site_id: i64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(1);
                coordinator.dispatch_alarm(sample_alarm(site_id)).await;
                println!("dispatched alarm for site {site_id}");
            }
            Some("targets") => {
                for target in repos.export_targets.find_all().await {
                    println!("{}: {} ({:?}, enabled={})", target.id, target.name, target.kind, target.enabled);
                }
            }
            Some(other) => println!("unknown command: {other}"),
            None => {}
        }
    }
}

async fn run_daemon(config: pulse_config::AppConfig, repos: Arc<RepositoryFactory>, secrets: Arc<SecretService>, coordinator: Arc<ExportCoordinator>) -> Result<()> {
    info!("starting pulse-dev in all-in-one daemon mode");
    let cache: Arc<dyn CacheStore> = Arc::new(RedisCacheStore::connect(&config.redis.url).await.context("failed to connect to cache store")?);

    let queue = Arc::new(BoundedEventQueue::new(10_000, 2_000));
    let registry = Arc::new(WorkerRegistry::new());
    let factory = WorkerFactory::new(Arc::clone(&repos), queue.clone());
    let scheduler = Arc::new(WorkerScheduler::new(Arc::clone(&registry), factory, Arc::clone(&repos), Arc::clone(&cache), config.collector.edge_server_id));
    let monitor = Arc::new(WorkerMonitor::new(Arc::clone(&scheduler), Arc::clone(&registry), MonitorConfig::default()));

    let started = scheduler.start_all_active_workers().await;
    info!(started, "started active workers");

    let collector_id_str = config.collector.edge_server_id.map(|id| id.to_string());
    let ingress = Arc::new(IngressDispatcher::new(queue, Arc::clone(&coordinator), Duration::from_millis(500)));
    let pubsub = Arc::new(PubSubDispatcher::new(&config.redis.url, Arc::clone(&repos), Arc::clone(&coordinator), collector_id_str));
    let gateway = Arc::new(CspGateway::new(Arc::clone(&coordinator), Some(ingress), pubsub));

    let _ = secrets;

    tokio::select! {
        _ = gateway.run() => {}
        _ = monitor.run() => {}
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    scheduler.stop_all_workers().await;
    info!("pulse-dev shutdown complete");
    Ok(())
}
