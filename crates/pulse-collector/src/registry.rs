//! Worker Registry (spec §4.5 C5, registry half).
//!
//! A thread-safe device-id → Worker map. `for_each` snapshots under the
//! lock then calls back outside it, so a callback that itself touches the
//! registry (e.g. to unregister a dead worker) can never deadlock against
//! its own iteration (spec §4.5: "prevents callback-reentrancy deadlock").

use crate::worker::Worker;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct WorkerRegistry {
    workers: DashMap<i64, Arc<Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, worker: Arc<Worker>) {
        self.workers.insert(worker.device_id(), worker);
    }

    pub fn unregister(&self, device_id: i64) -> Option<Arc<Worker>> {
        self.workers.remove(&device_id).map(|(_, w)| w)
    }

    pub fn get(&self, device_id: i64) -> Option<Arc<Worker>> {
        self.workers.get(&device_id).map(|w| Arc::clone(&w))
    }

    pub fn has(&self, device_id: i64) -> bool {
        self.workers.contains_key(&device_id)
    }

    pub fn count(&self) -> usize {
        self.workers.len()
    }

    /// Snapshots the current worker set and invokes `callback` for each
    /// one outside the map lock.
    pub fn for_each(&self, mut callback: impl FnMut(&Arc<Worker>)) {
        let snapshot: Vec<Arc<Worker>> = self.workers.iter().map(|e| Arc::clone(e.value())).collect();
        for worker in &snapshot {
            callback(worker);
        }
    }

    pub fn device_ids(&self) -> Vec<i64> {
        self.workers.iter().map(|e| *e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::events::BoundedEventQueue;
    use pulse_common::{AccessMode, DataType, Device, DeviceSettings, ProtocolType, Scaling};

    fn make_worker(id: i64) -> Arc<Worker> {
        let device = Device {
            id,
            tenant_id: 1,
            site_id: 1,
            edge_server_id: None,
            name: format!("d{id}"),
            protocol_id: 1,
            endpoint: "127.0.0.1:502".into(),
            config_blob: serde_json::Value::Null,
            enabled: true,
            polling_interval_ms: 1000,
            timeout_ms: 1000,
            retry_count: 3,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let settings = DeviceSettings {
            device_id: id,
            polling_interval_ms: 1000,
            connection_timeout_ms: 1000,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
            max_retry_count: 3,
            retry_interval_ms: 100,
            backoff_time_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_time_ms: 1000,
            keep_alive_enabled: false,
            keep_alive_interval_s: 30,
            keep_alive_timeout_s: 5,
            data_validation_enabled: true,
            performance_monitoring_enabled: false,
            diagnostic_mode: false,
            scan_rate_override: None,
        };
        let _ = (AccessMode::Read, DataType::Float, Scaling::default());
        let sink = Arc::new(BoundedEventQueue::new(100, 100));
        Arc::new(Worker::new(device, settings, vec![], ProtocolType::ModbusTcp, sink))
    }

    #[test]
    fn register_then_get_round_trips() {
        let registry = WorkerRegistry::new();
        registry.register(make_worker(1));
        assert!(registry.has(1));
        assert_eq!(registry.get(1).unwrap().device_id(), 1);
    }

    #[test]
    fn unregister_removes_entry() {
        let registry = WorkerRegistry::new();
        registry.register(make_worker(1));
        registry.unregister(1);
        assert!(!registry.has(1));
    }

    #[test]
    fn for_each_sees_every_registered_worker() {
        let registry = WorkerRegistry::new();
        registry.register(make_worker(1));
        registry.register(make_worker(2));
        let mut seen = Vec::new();
        registry.for_each(|w| seen.push(w.device_id()));
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn for_each_can_unregister_without_deadlocking() {
        let registry = WorkerRegistry::new();
        registry.register(make_worker(1));
        registry.register(make_worker(2));
        registry.for_each(|w| {
            registry.unregister(w.device_id());
        });
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn count_reflects_registered_workers() {
        let registry = WorkerRegistry::new();
        assert_eq!(registry.count(), 0);
        registry.register(make_worker(1));
        assert_eq!(registry.count(), 1);
    }
}
