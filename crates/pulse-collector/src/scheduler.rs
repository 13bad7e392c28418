//! Worker Registry & Scheduler, scheduler half (spec §4.5 C5).
//!
//! Orchestrates bulk and per-device operations over a [`WorkerRegistry`],
//! building new workers through a [`WorkerFactory`] on demand.

use crate::factory::WorkerFactory;
use crate::registry::WorkerRegistry;
use crate::worker::Worker;
use futures::future::join_all;
use pulse_common::cache::CacheStore;
use pulse_common::{PulseError, Quality, RawValue, TimestampedValue};
use pulse_repository::{Condition, RepositoryFactory};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct WorkerScheduler {
    registry: Arc<WorkerRegistry>,
    factory: WorkerFactory,
    repos: Arc<RepositoryFactory>,
    cache: Arc<dyn CacheStore>,
    /// This process's own `edge_servers.id` (spec §4.5 sharding key). `None`
    /// means unassigned, which per spec also owns zero devices.
    collector_id: Option<i64>,
    /// Handles for in-flight `worker.stop()` tasks spawned by
    /// `stop_all_workers` (spec §9 "pending futures are collected and
    /// pruned periodically so stale futures don't accumulate"). Drained and
    /// joined at the end of `stop_all_workers`; `prune_pending_futures` also
    /// lets a periodic caller (the worker monitor's sweep) reclaim finished
    /// handles between calls.
    pending_futures: StdMutex<Vec<JoinHandle<()>>>,
}

impl WorkerScheduler {
    pub fn new(registry: Arc<WorkerRegistry>, factory: WorkerFactory, repos: Arc<RepositoryFactory>, cache: Arc<dyn CacheStore>, collector_id: Option<i64>) -> Self {
        Self { registry, factory, repos, cache, collector_id, pending_futures: StdMutex::new(Vec::new()) }
    }

    /// Drops handles for tasks that have already finished. Safe to call at
    /// any time; does not touch handles still in flight.
    pub fn prune_pending_futures(&self) {
        let mut futures = self.pending_futures.lock().unwrap();
        futures.retain(|h| !h.is_finished());
    }

    pub fn pending_future_count(&self) -> usize {
        self.pending_futures.lock().unwrap().len()
    }

    /// Seeds the cache store with a placeholder for every read-enabled
    /// point before the worker's poll loop starts (spec §4.5 "before data
    /// begins flowing... seed the cache store with each of the device's
    /// current values loaded from the relational store"). This workspace's
    /// relational schema is configuration-only — live telemetry lives in
    /// the cache/time-series layer, never here — so "current value loaded
    /// from the relational store" degrades to a neutral placeholder that
    /// guarantees every point has a cache entry the instant the worker
    /// starts; the first successful poll overwrites it with a real one.
    async fn seed_cache(&self, device_id: i64) {
        let points = self.repos.data_points.find_by_conditions(&[Condition::eq("device_id", device_id)], None, None).await;
        for point in points {
            let placeholder = TimestampedValue { point_id: point.id, value: RawValue::Int(0), quality: Quality::Uncertain, timestamp: chrono::Utc::now(), sequence: 0 };
            if let Err(e) = self.cache.set_point_value(device_id, &placeholder).await {
                warn!(device_id, point_id = point.id, error = %e, "failed to seed cache with placeholder value");
            }
        }
    }

    /// spec §4.5 `StartWorker(id)`.
    pub async fn start_worker(&self, device_id: i64) -> Result<Arc<Worker>, PulseError> {
        let worker = match self.registry.get(device_id) {
            Some(w) => w,
            None => {
                let w = self.factory.build(device_id).await?;
                self.registry.register(Arc::clone(&w));
                w
            }
        };
        self.seed_cache(device_id).await;
        worker.start().await;
        Ok(worker)
    }

    /// spec §4.5 `StartAllActiveWorkers()`: enumerates devices sharded to
    /// this collector instance. A device whose `edge_server_id` is `None`
    /// (unassigned) or set to a different collector is skipped.
    pub async fn start_all_active_workers(&self) -> usize {
        let Some(collector_id) = self.collector_id else {
            info!("collector has no edge_server_id assigned; starting zero workers");
            return 0;
        };

        let devices = self.repos.devices.find_by_conditions(&[Condition::eq("enabled", true), Condition::eq("edge_server_id", collector_id)], None, None).await;

        let mut started = 0;
        for device in devices {
            match self.start_worker(device.id).await {
                Ok(_) => started += 1,
                Err(e) => warn!(device_id = device.id, error = %e, "failed to start worker"),
            }
        }
        started
    }

    pub async fn stop_all_workers(&self) {
        self.prune_pending_futures();

        let mut workers = Vec::new();
        self.registry.for_each(|w| workers.push(Arc::clone(w)));

        let handles: Vec<JoinHandle<()>> = workers.into_iter().map(|w| tokio::spawn(async move { w.stop().await })).collect();
        {
            let mut pending = self.pending_futures.lock().unwrap();
            pending.extend(handles);
        }

        let drained: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending_futures.lock().unwrap());
        join_all(drained).await;
    }

    pub fn pause_worker(&self, device_id: i64) -> Result<(), PulseError> {
        let worker = self.registry.get(device_id).ok_or_else(|| PulseError::Repository(format!("worker {device_id} not registered")))?;
        worker.pause();
        Ok(())
    }

    pub fn resume_worker(&self, device_id: i64) -> Result<(), PulseError> {
        let worker = self.registry.get(device_id).ok_or_else(|| PulseError::Repository(format!("worker {device_id} not registered")))?;
        worker.resume();
        Ok(())
    }

    /// spec §4.5 `ReloadWorkerSettings(id)`: state-preserving; a Running
    /// worker stays Running.
    pub async fn reload_worker_settings(&self, device_id: i64) -> Result<(), PulseError> {
        let worker = self.registry.get(device_id).ok_or_else(|| PulseError::Repository(format!("worker {device_id} not registered")))?;
        let settings = self.repos.device_settings.find_by_id(device_id).await.ok_or_else(|| PulseError::Repository(format!("device_settings missing for device {device_id}")))?;
        let points = self.repos.data_points.find_by_conditions(&[Condition::eq("device_id", device_id)], Some("address ASC"), None).await;
        worker.reload_data_points(settings, points);
        Ok(())
    }

    pub async fn restart_worker(&self, device_id: i64) -> Result<Arc<Worker>, PulseError> {
        if let Some(worker) = self.registry.get(device_id) {
            worker.stop().await;
        }
        self.start_worker(device_id).await
    }

    pub async fn write_data_point(&self, device_id: i64, point_id: i64, value: RawValue) -> Result<(), PulseError> {
        let worker = self.registry.get(device_id).ok_or_else(|| PulseError::Repository(format!("worker {device_id} not registered")))?;
        worker.write_data_point(point_id, value).await.map_err(|e| PulseError::Driver { class: e.class, message: e.message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::cache::InMemoryCacheStore;
    use pulse_common::events::BoundedEventQueue;
    use pulse_common::{Device, DeviceSettings, Protocol, ProtocolType};

    async fn seeded_env(collector_id: Option<i64>, device_edge_server_id: Option<i64>) -> (WorkerScheduler, i64) {
        let repos = Arc::new(RepositoryFactory::connect("sqlite::memory:", 5).await.unwrap());

        let mut protocol = Protocol {
            id: 0,
            protocol_type: ProtocolType::ModbusTcp,
            category: "industrial".into(),
            default_port: Some(502),
            uses_serial: false,
            requires_broker: false,
            supported_operations: vec!["read".into()],
            supported_data_types: vec!["int16".into()],
            connection_params_schema: serde_json::json!({}),
        };
        repos.protocols.save(&mut protocol).await;

        let now = chrono::Utc::now();
        let mut device = Device {
            id: 0,
            tenant_id: 1,
            site_id: 1,
            edge_server_id: device_edge_server_id,
            name: "plc-1".into(),
            protocol_id: protocol.id,
            endpoint: "127.0.0.1:502".into(),
            config_blob: serde_json::json!({"endpoint": "127.0.0.1:15021"}),
            enabled: true,
            polling_interval_ms: 1000,
            timeout_ms: 3000,
            retry_count: 3,
            created_at: now,
            updated_at: now,
        };
        repos.devices.save(&mut device).await;

        let mut settings = DeviceSettings {
            device_id: device.id,
            polling_interval_ms: 1000,
            connection_timeout_ms: 500,
            read_timeout_ms: 500,
            write_timeout_ms: 500,
            max_retry_count: 3,
            retry_interval_ms: 50,
            backoff_time_ms: 50,
            backoff_multiplier: 2.0,
            max_backoff_time_ms: 500,
            keep_alive_enabled: false,
            keep_alive_interval_s: 30,
            keep_alive_timeout_s: 5,
            data_validation_enabled: true,
            performance_monitoring_enabled: false,
            diagnostic_mode: false,
            scan_rate_override: None,
        };
        repos.device_settings.save(&mut settings).await;

        let sink = Arc::new(BoundedEventQueue::new(100, 100));
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let factory = WorkerFactory::new(Arc::clone(&repos), sink);
        let registry = Arc::new(WorkerRegistry::new());
        let scheduler = WorkerScheduler::new(registry, factory, repos, cache, collector_id);
        (scheduler, device.id)
    }

    #[tokio::test]
    async fn start_all_active_workers_skips_devices_with_no_edge_server() {
        let (scheduler, _) = seeded_env(Some(1), None).await;
        assert_eq!(scheduler.start_all_active_workers().await, 0);
    }

    #[tokio::test]
    async fn start_all_active_workers_skips_devices_assigned_elsewhere() {
        let (scheduler, _) = seeded_env(Some(1), Some(2)).await;
        assert_eq!(scheduler.start_all_active_workers().await, 0);
    }

    #[tokio::test]
    async fn start_all_active_workers_starts_matching_device() {
        let (scheduler, device_id) = seeded_env(Some(1), Some(1)).await;
        assert_eq!(scheduler.start_all_active_workers().await, 1);
        assert!(scheduler.registry.has(device_id));
    }

    #[tokio::test]
    async fn collector_with_no_assigned_id_starts_nothing() {
        let (scheduler, _) = seeded_env(None, Some(1)).await;
        assert_eq!(scheduler.start_all_active_workers().await, 0);
    }

    #[tokio::test]
    async fn start_worker_seeds_cache_before_returning() {
        let (scheduler, device_id) = seeded_env(Some(1), Some(1)).await;
        scheduler.start_worker(device_id).await.unwrap();
        scheduler.stop_all_workers().await;
    }

    #[tokio::test]
    async fn pause_and_resume_require_a_registered_worker() {
        let (scheduler, device_id) = seeded_env(Some(1), Some(1)).await;
        assert!(scheduler.pause_worker(device_id).is_err());
        scheduler.start_worker(device_id).await.unwrap();
        assert!(scheduler.pause_worker(device_id).is_ok());
        assert!(scheduler.resume_worker(device_id).is_ok());
        scheduler.stop_all_workers().await;
    }
}
