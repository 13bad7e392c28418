//! In-process ingress (spec §4.6 path 1): drains a worker-facing
//! [`BoundedEventQueue`] and hands each event to the export coordinator.

use std::sync::Arc;
use std::time::Duration;

use pulse_common::events::BoundedEventQueue;
use pulse_common::DispatchEvent;
use pulse_export::ExportCoordinator;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

pub struct IngressDispatcher {
    queue: Arc<BoundedEventQueue>,
    coordinator: Arc<ExportCoordinator>,
    drain_interval: Duration,
}

impl IngressDispatcher {
    pub fn new(queue: Arc<BoundedEventQueue>, coordinator: Arc<ExportCoordinator>, drain_interval: Duration) -> Self {
        Self { queue, coordinator, drain_interval }
    }

    /// Drains whatever is currently queued, alarms ahead of values (the
    /// queue itself orders the drain; see `BoundedEventQueue::drain`).
    pub async fn drain_once(&self) -> usize {
        let events = self.queue.drain();
        let count = events.len();
        for event in events {
            match event {
                DispatchEvent::Value { device_id, value } => self.coordinator.dispatch_value(device_id, value).await,
                DispatchEvent::AlarmRaised(alarm) => self.coordinator.dispatch_alarm(alarm).await,
            }
        }
        if count > 0 {
            debug!(count, "drained in-process dispatch queue");
        }
        count
    }

    /// Runs forever, waking on a fixed tick rather than blocking on the
    /// queue (the queue is a plain `Mutex<VecDeque>`, not a channel, so
    /// there is nothing to await between ticks).
    pub async fn run(&self) {
        let mut ticker = interval(self.drain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.drain_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::events::EventSink;
    use pulse_common::{AlarmStatus, Quality, RawValue, TimestampedValue};
    use pulse_repository::RepositoryFactory;
    use pulse_secrets::SecretService;
    use std::collections::HashMap;

    async fn coordinator() -> Arc<ExportCoordinator> {
        let repos = Arc::new(RepositoryFactory::connect("sqlite::memory:", 5).await.unwrap());
        let secrets = Arc::new(SecretService::new(&pulse_secrets::SecretsConfig::default()).await.unwrap());
        let dir = tempfile::tempdir().unwrap();
        Arc::new(ExportCoordinator::new(repos, secrets, dir.path(), true, 14, 60))
    }

    #[tokio::test]
    async fn drain_once_is_a_no_op_on_an_empty_queue() {
        let queue = Arc::new(BoundedEventQueue::new(10, 10));
        let dispatcher = IngressDispatcher::new(queue, coordinator().await, Duration::from_millis(10));
        assert_eq!(dispatcher.drain_once().await, 0);
    }

    #[tokio::test]
    async fn drain_once_dispatches_every_queued_event() {
        let queue = Arc::new(BoundedEventQueue::new(10, 10));
        queue.push(DispatchEvent::AlarmRaised(pulse_common::Alarm {
            site_id: 1,
            point_id: None,
            point_name: None,
            description: None,
            measured_value: RawValue::Bool(true),
            timestamp: chrono::Utc::now(),
            alarm_flag: true,
            status: AlarmStatus::Alert,
            manual_override: false,
            extra_info: None,
            custom_vars: HashMap::new(),
        }));
        queue.push(DispatchEvent::Value {
            device_id: 999_999,
            value: TimestampedValue { point_id: 1, value: RawValue::Int(1), quality: Quality::Good, timestamp: chrono::Utc::now(), sequence: 1 },
        });
        let dispatcher = IngressDispatcher::new(queue, coordinator().await, Duration::from_millis(10));
        assert_eq!(dispatcher.drain_once().await, 2);
    }
}
