//! Worker monitor (SPEC_FULL.md supplemental feature: a background task
//! watching for workers stuck in `Reconnecting` past a configurable
//! timeout and restarting them). Modeled directly on `fc-outbox`'s
//! `RecoveryTask`: a disabled-by-default interval loop over a registry
//! snapshot, restarting anything past its deadline rather than anything
//! merely "in that state".

use crate::scheduler::WorkerScheduler;
use pulse_common::DeviceState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub stuck_timeout: Duration,
    pub enabled: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { check_interval: Duration::from_secs(30), stuck_timeout: Duration::from_secs(300), enabled: true }
    }
}

pub struct WorkerMonitor {
    scheduler: Arc<WorkerScheduler>,
    registry: Arc<crate::registry::WorkerRegistry>,
    config: MonitorConfig,
    /// When each currently-Reconnecting device first entered that state;
    /// used to distinguish "just started backing off" from "actually
    /// stuck".
    reconnecting_since: Mutex<HashMap<i64, Instant>>,
}

impl WorkerMonitor {
    pub fn new(scheduler: Arc<WorkerScheduler>, registry: Arc<crate::registry::WorkerRegistry>, config: MonitorConfig) -> Self {
        Self { scheduler, registry, config, reconnecting_since: Mutex::new(HashMap::new()) }
    }

    pub async fn run(&self) {
        if !self.config.enabled {
            info!("worker monitor is disabled");
            return;
        }

        info!(interval = ?self.config.check_interval, timeout = ?self.config.stuck_timeout, "starting worker monitor");
        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    async fn sweep(&self) {
        self.scheduler.prune_pending_futures();

        let mut device_ids = Vec::new();
        let mut states = Vec::new();
        self.registry.for_each(|w| {
            device_ids.push(w.device_id());
            states.push(w.state());
        });

        let now = Instant::now();
        let mut tracked = self.reconnecting_since.lock().await;
        tracked.retain(|id, _| device_ids.contains(id));

        for (device_id, state) in device_ids.iter().zip(states.iter()) {
            if *state != DeviceState::Reconnecting {
                tracked.remove(device_id);
                continue;
            }
            let since = *tracked.entry(*device_id).or_insert(now);
            if now.duration_since(since) >= self.config.stuck_timeout {
                warn!(device_id, "worker stuck reconnecting past timeout, restarting");
                if let Err(e) = self.scheduler.restart_worker(*device_id).await {
                    warn!(device_id, error = %e, "failed to restart stuck worker");
                }
                tracked.remove(device_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::WorkerFactory;
    use crate::registry::WorkerRegistry;
    use pulse_common::cache::{CacheStore, InMemoryCacheStore};
    use pulse_common::events::BoundedEventQueue;
    use pulse_repository::RepositoryFactory;

    #[tokio::test]
    async fn sweep_ignores_workers_not_reconnecting() {
        let repos = Arc::new(RepositoryFactory::connect("sqlite::memory:", 5).await.unwrap());
        let sink = Arc::new(BoundedEventQueue::new(10, 10));
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let registry = Arc::new(WorkerRegistry::new());
        let factory = WorkerFactory::new(Arc::clone(&repos), sink);
        let scheduler = Arc::new(WorkerScheduler::new(Arc::clone(&registry), factory, repos, cache, Some(1)));
        let monitor = WorkerMonitor::new(scheduler, registry, MonitorConfig { enabled: true, ..Default::default() });
        // No workers registered; sweep must be a no-op, not panic.
        monitor.sweep().await;
        assert!(monitor.reconnecting_since.lock().await.is_empty());
    }
}
