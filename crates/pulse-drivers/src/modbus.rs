//! Modbus TCP/RTU driver (spec §4.2), backed by `tokio-modbus`.
//!
//! Reads are split into chunks of [`crate::MODBUS_MAX_REGS_PER_READ`]
//! holding registers (FC03) honoring the protocol's per-request limit; a
//! chunk that fails downgrades only its own points to `Bad` quality so one
//! bad sub-range never fails the whole batch (spec §4.2 batch contract).

use crate::{
    DriverCallback, DriverError, PointDescriptor, PointReading, ProtocolDriver,
    SubscriptionHandle, MODBUS_MAX_REGS_PER_READ,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use pulse_common::{ProtocolType, Quality, RawValue};
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_modbus::client::{tcp, Context as ModbusContext};
use tokio_modbus::prelude::*;

#[derive(Debug, Deserialize)]
struct ModbusConfig {
    endpoint: String,
    #[serde(default = "default_slave")]
    slave_id: u8,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_slave() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    3000
}

pub struct ModbusTcpDriver {
    config: RwLock<Option<ModbusConfig>>,
    ctx: Mutex<Option<ModbusContext>>,
    last_error: RwLock<Option<DriverError>>,
    callback: RwLock<Option<DriverCallback>>,
    next_handle: AtomicU64,
}

impl ModbusTcpDriver {
    pub fn new() -> Self {
        Self {
            config: RwLock::new(None),
            ctx: Mutex::new(None),
            last_error: RwLock::new(None),
            callback: RwLock::new(None),
            next_handle: AtomicU64::new(1),
        }
    }

    fn record(&self, err: DriverError) -> DriverError {
        *self.last_error.write() = Some(err.clone());
        err
    }

    async fn connect_with_timeout(&self, cfg: &ModbusConfig) -> Result<ModbusContext, DriverError> {
        let addr: SocketAddr = cfg
            .endpoint
            .parse()
            .map_err(|e| DriverError::fatal(format!("invalid modbus endpoint {}: {e}", cfg.endpoint)))?;
        let connect = tcp::connect_slave(addr, Slave(cfg.slave_id));
        tokio::time::timeout(Duration::from_millis(cfg.timeout_ms), connect)
            .await
            .map_err(|_| DriverError::transient("modbus connect timed out"))?
            .map_err(|e| DriverError::transient(format!("modbus connect failed: {e}")))
    }
}

impl Default for ModbusTcpDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolDriver for ModbusTcpDriver {
    async fn initialize(&self, config: Value, on_event: DriverCallback) -> Result<(), DriverError> {
        let cfg: ModbusConfig = serde_json::from_value(config)
            .map_err(|e| self.record(DriverError::fatal(format!("invalid modbus config: {e}"))))?;
        *self.config.write() = Some(cfg);
        *self.callback.write() = Some(on_event);
        Ok(())
    }

    async fn connect(&self) -> Result<(), DriverError> {
        let cfg = self.config.read().clone().ok_or_else(|| DriverError::fatal("driver not initialized"))?;
        let new_ctx = self.connect_with_timeout(&cfg).await.map_err(|e| self.record(e))?;
        *self.ctx.lock().await = Some(new_ctx);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        *self.ctx.lock().await = None;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.ctx.lock().await.is_some()
    }

    async fn read_single(&self, point: &PointDescriptor) -> Result<PointReading, DriverError> {
        let results = self.read_batch(std::slice::from_ref(point)).await;
        results
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::protocol("no reading returned for point"))
    }

    async fn read_batch(&self, points: &[PointDescriptor]) -> Vec<PointReading> {
        let mut out = Vec::with_capacity(points.len());
        for chunk in points.chunks(MODBUS_MAX_REGS_PER_READ) {
            let mut guard = self.ctx.lock().await;
            let Some(ctx) = guard.as_mut() else {
                for p in chunk {
                    out.push(PointReading { point_id: p.point_id, value: RawValue::Int(0), quality: Quality::CommFailure });
                }
                continue;
            };
            for p in chunk {
                let addr = p.address as u16;
                let reading = match ctx.read_holding_registers(addr, 1).await {
                    Ok(Ok(regs)) => {
                        let raw = regs.first().copied().unwrap_or(0);
                        PointReading { point_id: p.point_id, value: RawValue::Int(raw as i64), quality: Quality::Good }
                    }
                    Ok(Err(exception)) => {
                        self.record(DriverError::protocol(format!("modbus exception: {exception}")));
                        PointReading { point_id: p.point_id, value: RawValue::Int(0), quality: Quality::Bad }
                    }
                    Err(e) => {
                        self.record(DriverError::transient(format!("modbus read failed: {e}")));
                        PointReading { point_id: p.point_id, value: RawValue::Int(0), quality: Quality::CommFailure }
                    }
                };
                out.push(reading);
            }
        }
        out
    }

    async fn write_single(&self, point: &PointDescriptor, value: RawValue) -> Result<(), DriverError> {
        let mut guard = self.ctx.lock().await;
        let ctx = guard.as_mut().ok_or_else(|| DriverError::transient("not connected"))?;
        let raw = value.as_f64().ok_or_else(|| DriverError::protocol("value is not numeric"))? as u16;
        ctx.write_single_register(point.address as u16, raw)
            .await
            .map_err(|e| self.record(DriverError::transient(format!("modbus write failed: {e}"))))?
            .map_err(|e| self.record(DriverError::protocol(format!("modbus exception: {e}"))))
    }

    async fn subscribe(&self, _point: &PointDescriptor, _on_event: DriverCallback) -> Result<SubscriptionHandle, DriverError> {
        // Modbus has no native pub/sub (spec §4.2: "protocols that support
        // COV/pub-sub"); polling is the only acquisition mode here.
        Err(DriverError::protocol("modbus does not support subscriptions"))
    }

    async fn unsubscribe(&self, _handle: SubscriptionHandle) -> Result<(), DriverError> {
        Ok(())
    }

    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::ModbusTcp
    }

    fn last_error(&self) -> Option<DriverError> {
        self.last_error.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::{AccessMode, DataType};

    fn test_point(id: i64, address: i64) -> PointDescriptor {
        PointDescriptor { point_id: id, address, data_type: DataType::Int16, access_mode: AccessMode::Read, protocol_params: Value::Null }
    }

    #[tokio::test]
    async fn read_batch_reports_comm_failure_when_disconnected() {
        let driver = ModbusTcpDriver::new();
        let points = vec![test_point(1, 40001), test_point(2, 40002)];
        let readings = driver.read_batch(&points).await;
        assert_eq!(readings.len(), 2);
        assert!(readings.iter().all(|r| r.quality == Quality::CommFailure));
    }

    #[tokio::test]
    async fn connect_without_initialize_is_a_fatal_error() {
        let driver = ModbusTcpDriver::new();
        let err = driver.connect().await.unwrap_err();
        assert_eq!(err.class, pulse_common::DriverErrorClass::Fatal);
    }

    #[tokio::test]
    async fn initialize_rejects_malformed_config() {
        let driver = ModbusTcpDriver::new();
        let cb: DriverCallback = std::sync::Arc::new(|_| {});
        let err = driver.initialize(serde_json::json!({"not_endpoint": true}), cb).await.unwrap_err();
        assert_eq!(err.class, pulse_common::DriverErrorClass::Fatal);
    }

    #[tokio::test]
    async fn subscribe_is_unsupported_for_modbus() {
        let driver = ModbusTcpDriver::new();
        let cb: DriverCallback = std::sync::Arc::new(|_| {});
        assert!(driver.subscribe(&test_point(1, 40001), cb).await.is_err());
    }
}
