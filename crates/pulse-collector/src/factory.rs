//! Worker Factory (spec §4.5: "a factory component (C1 + C2)").
//!
//! Loads a Device, its DeviceSettings and DataPoints from the repository
//! layer, resolves its Protocol to a [`pulse_common::ProtocolType`], and
//! returns an uninitialized-but-configured [`Worker`] — wired with
//! callbacks, not yet started.

use crate::worker::Worker;
use pulse_common::events::EventSink;
use pulse_common::PulseError;
use pulse_repository::{Condition, RepositoryFactory};
use std::sync::Arc;

pub struct WorkerFactory {
    repos: Arc<RepositoryFactory>,
    sink: Arc<dyn EventSink>,
}

impl WorkerFactory {
    pub fn new(repos: Arc<RepositoryFactory>, sink: Arc<dyn EventSink>) -> Self {
        Self { repos, sink }
    }

    pub async fn build(&self, device_id: i64) -> Result<Arc<Worker>, PulseError> {
        let device = self
            .repos
            .devices
            .find_by_id(device_id)
            .await
            .ok_or_else(|| PulseError::Repository(format!("device {device_id} not found")))?;

        let settings = self
            .repos
            .device_settings
            .find_by_id(device_id)
            .await
            .ok_or_else(|| PulseError::Repository(format!("device_settings missing for device {device_id}")))?;

        let points = self.repos.data_points.find_by_conditions(&[Condition::eq("device_id", device_id)], Some("address ASC"), None).await;

        let protocol = self
            .repos
            .protocols
            .find_by_id(device.protocol_id)
            .await
            .ok_or_else(|| PulseError::Repository(format!("protocol {} not found", device.protocol_id)))?;

        Ok(Arc::new(Worker::new(device, settings, points, protocol.protocol_type, Arc::clone(&self.sink))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::events::BoundedEventQueue;
    use pulse_common::{Device, DeviceSettings, Protocol, ProtocolType};

    async fn seeded_factory() -> (WorkerFactory, i64) {
        let repos = Arc::new(RepositoryFactory::connect("sqlite::memory:", 5).await.unwrap());

        let mut protocol = Protocol {
            id: 0,
            protocol_type: ProtocolType::ModbusTcp,
            category: "industrial".into(),
            default_port: Some(502),
            uses_serial: false,
            requires_broker: false,
            supported_operations: vec!["read".into(), "write".into()],
            supported_data_types: vec!["int16".into()],
            connection_params_schema: serde_json::json!({}),
        };
        repos.protocols.save(&mut protocol).await;

        let now = chrono::Utc::now();
        let mut device = Device {
            id: 0,
            tenant_id: 1,
            site_id: 1,
            edge_server_id: None,
            name: "plc-1".into(),
            protocol_id: protocol.id,
            endpoint: "127.0.0.1:502".into(),
            config_blob: serde_json::json!({"endpoint": "127.0.0.1:15020"}),
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
            connection_timeout_ms: 3000,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
            max_retry_count: 3,
            retry_interval_ms: 500,
            backoff_time_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_time_ms: 30_000,
            keep_alive_enabled: true,
            keep_alive_interval_s: 30,
            keep_alive_timeout_s: 5,
            data_validation_enabled: true,
            performance_monitoring_enabled: false,
            diagnostic_mode: false,
            scan_rate_override: None,
        };
        repos.device_settings.save(&mut settings).await;

        let sink = Arc::new(BoundedEventQueue::new(1000, 1000));
        (WorkerFactory::new(repos, sink), device.id)
    }

    #[tokio::test]
    async fn builds_a_worker_from_persisted_device() {
        let (factory, device_id) = seeded_factory().await;
        let worker = factory.build(device_id).await.unwrap();
        assert_eq!(worker.device_id(), device_id);
        assert_eq!(worker.protocol_type(), ProtocolType::ModbusTcp);
    }

    #[tokio::test]
    async fn build_fails_for_unknown_device() {
        let (factory, _) = seeded_factory().await;
        let err = factory.build(999_999).await.unwrap_err();
        assert!(matches!(err, PulseError::Repository(_)));
    }
}
