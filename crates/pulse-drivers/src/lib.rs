//! Protocol Driver Abstraction (spec §4.2, component C2).
//!
//! One trait, [`ProtocolDriver`], gives the collector (C3/C4) a uniform
//! surface over Modbus, BACnet, MQTT and OPC-UA sessions. Per spec §9
//! ("Dynamic dispatch on driver/handler kind"), the *set* of driver kinds is
//! closed and selected via [`pulse_common::ProtocolType`] rather than open
//! trait-object registration; [`build_driver`] is the one place that match
//! happens.
//!
//! Modbus (`modbus.rs`) and MQTT (`mqtt.rs`) talk to real peers through
//! `tokio-modbus` and `rumqttc`. BACnet/IP and OPC-UA (`bacnet.rs`,
//! `opcua.rs`) are software-simulated sessions: spec §1 explicitly puts
//! concrete wire encoding for those stacks out of scope ("BACnet-stack...
//! assumed as black-box drivers"), and no such crate exists in this
//! workspace's dependency set. The simulation still drives the full state
//! machine (Connect/Read/Write/Subscribe, discovery callbacks, structured
//! errors) so C3/C4 exercise the real abstraction boundary in tests.

pub mod bacnet;
pub mod modbus;
pub mod mqtt;
pub mod opcua;
pub mod simulated;

use async_trait::async_trait;
use pulse_common::{AccessMode, DataType, DriverErrorClass, ProtocolType, Quality, RawValue};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A single addressable tag passed to the driver (spec §4.2 "point
/// descriptor"). Built by the polling group engine from a `DataPoint`
/// without requiring the driver to know about the repository layer.
#[derive(Debug, Clone)]
pub struct PointDescriptor {
    pub point_id: i64,
    pub address: i64,
    pub data_type: DataType,
    pub access_mode: AccessMode,
    pub protocol_params: Value,
}

/// Structured error carried in the driver's last-error slot (spec §4.2:
/// "never thrown"). `class` drives the worker state machine's transition
/// table (spec §4.3, §7).
#[derive(Debug, Clone, Error)]
#[error("{class:?} driver error ({code}): {message}")]
pub struct DriverError {
    pub class: DriverErrorClass,
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { class: DriverErrorClass::Transient, code: 1, message: message.into() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self { class: DriverErrorClass::Protocol, code: 2, message: message.into() }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self { class: DriverErrorClass::Fatal, code: 3, message: message.into() }
    }
}

/// Opaque handle returned by `subscribe`, used only to `unsubscribe` later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Asynchronous traffic a driver was not polled for: BACnet I-Am, MQTT
/// publish, a COV notification (spec §4.2 "surface asynchronous incoming
/// traffic... via callbacks registered at initialization time").
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// A device announced itself during discovery (BACnet Who-Is/I-Am).
    Discovered { endpoint: String, metadata: Value },
    /// An unsolicited value arrived for a subscribed point (MQTT message,
    /// BACnet COV notification).
    PointUpdate { point_id: i64, value: RawValue, quality: Quality },
}

pub type DriverCallback = Arc<dyn Fn(DriverEvent) + Send + Sync>;

/// One successful or failed read, keyed by point id (spec §4.2 ReadBatch:
/// "must return per-point quality rather than failing the whole batch").
#[derive(Debug, Clone)]
pub struct PointReading {
    pub point_id: i64,
    pub value: RawValue,
    pub quality: Quality,
}

/// Uniform surface over every protocol stack (spec §4.2).
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    async fn initialize(&self, config: Value, on_event: DriverCallback) -> Result<(), DriverError>;
    async fn connect(&self) -> Result<(), DriverError>;
    async fn disconnect(&self) -> Result<(), DriverError>;
    async fn is_connected(&self) -> bool;

    async fn read_single(&self, point: &PointDescriptor) -> Result<PointReading, DriverError>;

    /// May short-read: a point that fails is reported with a failing
    /// quality, not omitted (spec §4.2).
    async fn read_batch(&self, points: &[PointDescriptor]) -> Vec<PointReading>;

    async fn write_single(&self, point: &PointDescriptor, value: RawValue) -> Result<(), DriverError>;

    async fn subscribe(
        &self,
        point: &PointDescriptor,
        on_event: DriverCallback,
    ) -> Result<SubscriptionHandle, DriverError>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), DriverError>;

    fn protocol_type(&self) -> ProtocolType;

    /// Last structured error recorded, if any (spec §4.2 "attached to the
    /// last-error slot").
    fn last_error(&self) -> Option<DriverError>;
}

impl fmt::Debug for dyn ProtocolDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolDriver({:?})", self.protocol_type())
    }
}

/// Batch-read chunking limits a driver must honor (spec §4.4 "address
/// within a configurable stride", §4.2 "Modbus FC03 ≤ 125 regs, BACnet APDU
/// size").
pub const MODBUS_MAX_REGS_PER_READ: usize = 125;
pub const BACNET_MAX_OBJECTS_PER_READ: usize = 1;

/// Select and construct the driver for a protocol (spec §9: tagged variant
/// over virtual dispatch for a closed kind set). Callers own the returned
/// driver for the lifetime of one `Worker` (spec §3 ownership rules).
pub fn build_driver(protocol: ProtocolType) -> Arc<dyn ProtocolDriver> {
    match protocol {
        ProtocolType::ModbusTcp => Arc::new(modbus::ModbusTcpDriver::new()),
        ProtocolType::ModbusRtu => Arc::new(modbus::ModbusTcpDriver::new()),
        ProtocolType::BacnetIp => Arc::new(bacnet::BacnetIpDriver::new()),
        ProtocolType::Mqtt => Arc::new(mqtt::MqttDriver::new()),
        ProtocolType::OpcUa => Arc::new(opcua::OpcUaDriver::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_helpers_set_expected_classes() {
        assert_eq!(DriverError::transient("x").class, DriverErrorClass::Transient);
        assert_eq!(DriverError::protocol("x").class, DriverErrorClass::Protocol);
        assert_eq!(DriverError::fatal("x").class, DriverErrorClass::Fatal);
    }

    #[test]
    fn build_driver_selects_matching_protocol_type() {
        assert_eq!(build_driver(ProtocolType::ModbusTcp).protocol_type(), ProtocolType::ModbusTcp);
        assert_eq!(build_driver(ProtocolType::Mqtt).protocol_type(), ProtocolType::Mqtt);
        assert_eq!(build_driver(ProtocolType::BacnetIp).protocol_type(), ProtocolType::BacnetIp);
        assert_eq!(build_driver(ProtocolType::OpcUa).protocol_type(), ProtocolType::OpcUa);
    }
}
