//! OPC-UA driver (spec §4.2).
//!
//! Like [`crate::bacnet`], this is a software simulation rather than a real
//! binary-protocol client: spec §1 puts concrete wire encoding out of scope
//! and no OPC-UA crate is part of this workspace's dependency set. The
//! simulation still enforces the same connect/session lifecycle a real
//! client would (an OPC-UA session must be established before Read/Write
//! service calls are valid).

use crate::simulated::SimulatedState;
use crate::{
    DriverCallback, DriverError, DriverEvent, PointDescriptor, PointReading, ProtocolDriver,
    SubscriptionHandle,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use pulse_common::{ProtocolType, Quality, RawValue};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Deserialize, Default)]
struct OpcUaConfig {
    #[serde(default)]
    endpoint_url: String,
    #[serde(default)]
    security_policy: Option<String>,
}

pub struct OpcUaDriver {
    state: SimulatedState,
    config: RwLock<OpcUaConfig>,
    next_handle: AtomicU64,
}

impl OpcUaDriver {
    pub fn new() -> Self {
        Self { state: SimulatedState::default(), config: RwLock::new(OpcUaConfig::default()), next_handle: AtomicU64::new(1) }
    }
}

impl Default for OpcUaDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolDriver for OpcUaDriver {
    async fn initialize(&self, config: Value, on_event: DriverCallback) -> Result<(), DriverError> {
        let cfg: OpcUaConfig = serde_json::from_value(config)
            .map_err(|e| self.state.record_error(DriverError::fatal(format!("invalid opc-ua config: {e}"))))?;
        *self.config.write() = cfg;
        *self.state.callback.write() = Some(on_event);
        Ok(())
    }

    async fn connect(&self) -> Result<(), DriverError> {
        if self.config.read().endpoint_url.is_empty() {
            return Err(self.state.record_error(DriverError::fatal("opc-ua endpoint_url is required")));
        }
        *self.state.connected.write() = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        *self.state.connected.write() = false;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        *self.state.connected.read()
    }

    async fn read_single(&self, point: &PointDescriptor) -> Result<PointReading, DriverError> {
        if !*self.state.connected.read() {
            return Err(self.state.record_error(DriverError::transient("session not established")));
        }
        let (value, quality) = self.state.simulate_reading(point.address);
        Ok(PointReading { point_id: point.point_id, value, quality })
    }

    async fn read_batch(&self, points: &[PointDescriptor]) -> Vec<PointReading> {
        points
            .iter()
            .map(|p| {
                if !*self.state.connected.read() {
                    return PointReading { point_id: p.point_id, value: RawValue::Bool(false), quality: Quality::CommFailure };
                }
                let (value, quality) = self.state.simulate_reading(p.address);
                PointReading { point_id: p.point_id, value, quality }
            })
            .collect()
    }

    async fn write_single(&self, point: &PointDescriptor, value: RawValue) -> Result<(), DriverError> {
        if !*self.state.connected.read() {
            return Err(self.state.record_error(DriverError::transient("session not established")));
        }
        self.state.seed(point.address, value, Quality::Good);
        Ok(())
    }

    async fn subscribe(&self, point: &PointDescriptor, on_event: DriverCallback) -> Result<SubscriptionHandle, DriverError> {
        if !*self.state.connected.read() {
            return Err(self.state.record_error(DriverError::transient("session not established")));
        }
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let (value, quality) = self.state.simulate_reading(point.address);
        on_event(DriverEvent::PointUpdate { point_id: point.point_id, value, quality });
        Ok(handle)
    }

    async fn unsubscribe(&self, _handle: SubscriptionHandle) -> Result<(), DriverError> {
        Ok(())
    }

    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::OpcUa
    }

    fn last_error(&self) -> Option<DriverError> {
        self.state.last_error.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::{AccessMode, DataType};
    use std::sync::Arc;

    fn point(id: i64, addr: i64) -> PointDescriptor {
        PointDescriptor { point_id: id, address: addr, data_type: DataType::Float, access_mode: AccessMode::Read, protocol_params: Value::Null }
    }

    #[tokio::test]
    async fn connect_without_endpoint_is_fatal() {
        let driver = OpcUaDriver::new();
        let cb: DriverCallback = Arc::new(|_| {});
        driver.initialize(Value::Null, cb).await.unwrap();
        let err = driver.connect().await.unwrap_err();
        assert_eq!(err.class, pulse_common::DriverErrorClass::Fatal);
    }

    #[tokio::test]
    async fn connect_with_endpoint_succeeds_then_reads() {
        let driver = OpcUaDriver::new();
        let cb: DriverCallback = Arc::new(|_| {});
        driver.initialize(serde_json::json!({"endpoint_url": "opc.tcp://localhost:4840"}), cb).await.unwrap();
        driver.connect().await.unwrap();
        assert!(driver.is_connected().await);
        let reading = driver.read_single(&point(1, 5)).await.unwrap();
        assert_eq!(reading.quality, Quality::Good);
    }
}
