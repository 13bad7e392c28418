//! Shared domain types for PulseOne.
//!
//! Mirrors the role fc-common played for FlowCatalyst: the one crate every
//! other crate in the workspace depends on for wire/storage-shape-agnostic
//! types, so that repository, driver, collector, dispatch and export crates
//! agree on a single vocabulary.

pub mod cache;
pub mod events;
pub mod logging;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Data quality attached to every value leaving a driver or polling group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Good,
    Uncertain,
    Bad,
    CommFailure,
    OutOfRange,
    SensorFault,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A raw value as read from (or written to) a protocol driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl RawValue {
    /// Numeric view used by scaling (`eng = raw * factor + offset`).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            RawValue::Int(i) => Some(*i as f64),
            RawValue::Float(f) => Some(*f),
            RawValue::Str(_) | RawValue::Bytes(_) => None,
        }
    }

    /// True for `"{{var}}"`-only leaves whose native type should not be
    /// stringified by the payload transformer (spec §4.8 leaf rule).
    pub fn is_native_json_scalar(&self) -> bool {
        matches!(self, RawValue::Bool(_) | RawValue::Int(_) | RawValue::Float(_))
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            RawValue::Bool(b) => serde_json::Value::Bool(*b),
            RawValue::Int(i) => serde_json::json!(*i),
            RawValue::Float(f) => serde_json::json!(*f),
            RawValue::Str(s) => serde_json::Value::String(s.clone()),
            RawValue::Bytes(b) => serde_json::Value::String(hex::encode(b)),
        }
    }
}

/// The unit of data flow out of a polling group (spec §3 TimestampedValue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedValue {
    pub point_id: i64,
    pub value: RawValue,
    pub quality: Quality,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

/// Closed set of protocol kinds (spec §9 Design Notes: tagged variant over
/// virtual dispatch for a closed kind set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolType {
    ModbusTcp,
    ModbusRtu,
    BacnetIp,
    Mqtt,
    OpcUa,
}

impl ProtocolType {
    pub fn symbolic(&self) -> &'static str {
        match self {
            ProtocolType::ModbusTcp => "MODBUS_TCP",
            ProtocolType::ModbusRtu => "MODBUS_RTU",
            ProtocolType::BacnetIp => "BACNET_IP",
            ProtocolType::Mqtt => "MQTT",
            ProtocolType::OpcUa => "OPC_UA",
        }
    }

    pub fn uses_serial(&self) -> bool {
        matches!(self, ProtocolType::ModbusRtu)
    }

    pub fn requires_broker(&self) -> bool {
        matches!(self, ProtocolType::Mqtt)
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            ProtocolType::ModbusTcp => Some(502),
            ProtocolType::BacnetIp => Some(47808),
            ProtocolType::Mqtt => Some(1883),
            ProtocolType::OpcUa => Some(4840),
            ProtocolType::ModbusRtu => None,
        }
    }
}

impl std::str::FromStr for ProtocolType {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MODBUS_TCP" => Ok(ProtocolType::ModbusTcp),
            "MODBUS_RTU" => Ok(ProtocolType::ModbusRtu),
            "BACNET_IP" => Ok(ProtocolType::BacnetIp),
            "MQTT" => Ok(ProtocolType::Mqtt),
            "OPC_UA" => Ok(ProtocolType::OpcUa),
            other => Err(PulseError::Config(format!("unknown protocol type: {other}"))),
        }
    }
}

/// Access mode for a DataPoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
            AccessMode::ReadWrite => "read_write",
        }
    }
}

impl std::str::FromStr for AccessMode {
    type Err = PulseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(AccessMode::Read),
            "write" => Ok(AccessMode::Write),
            "read_write" => Ok(AccessMode::ReadWrite),
            other => Err(PulseError::Config(format!("unknown access mode: {other}"))),
        }
    }
}

/// Protocol-level data type for a DataPoint (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int16,
    Uint16,
    Int32,
    Float,
    String,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int16 => "int16",
            DataType::Uint16 => "uint16",
            DataType::Int32 => "int32",
            DataType::Float => "float",
            DataType::String => "string",
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = PulseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(DataType::Bool),
            "int16" => Ok(DataType::Int16),
            "uint16" => Ok(DataType::Uint16),
            "int32" => Ok(DataType::Int32),
            "float" => Ok(DataType::Float),
            "string" => Ok(DataType::String),
            other => Err(PulseError::Config(format!("unknown data type: {other}"))),
        }
    }
}

/// Per-device lifecycle state (spec §4.3). Kept here, not in pulse-collector,
/// because the repository/status surface and the collector both need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Stopped,
    Starting,
    Running,
    Reconnecting,
    DeviceOffline,
    Paused,
    Maintenance,
    Error,
    Stopping,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Configuration entity: a field device (spec §3 Device).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub tenant_id: i64,
    pub site_id: i64,
    pub edge_server_id: Option<i64>,
    pub name: String,
    pub protocol_id: i64,
    pub endpoint: String,
    pub config_blob: serde_json::Value,
    pub enabled: bool,
    pub polling_interval_ms: u32,
    pub timeout_ms: u32,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Configuration entity: a physical site grouping devices (spec §3, referenced
/// by Device.site_id and Alarm.site_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub timezone: String,
}

/// Configuration entity: a tenant/organization row (spec §6 table list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
}

/// Configuration entity: an operator account (spec §6 table list). The core
/// only reads this table (admin/auth surfaces are out of scope per spec §1);
/// it exists so repository/config-reload code has a row shape to join against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub tenant_id: i64,
    pub username: String,
    pub enabled: bool,
}

/// Configuration entity: a horizontal collector shard (spec §3 "Edge server /
/// collector id", §6 `edge_servers` table). `id` is the value compared
/// against `Device.edge_server_id` and `CollectorConfig.edge_server_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeServer {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub enabled: bool,
}

/// Configuration entity: process-wide tunables stored in the relational
/// store rather than the local TOML file (spec §6 `system_settings` table) —
/// e.g. operator-adjusted values that should survive a process restart
/// without editing the config file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSetting {
    pub key: String,
    pub value: String,
}

/// Configuration entity: a per-device cron schedule distinct from
/// `ExportSchedule` (spec §6 `device_schedules` table) — e.g. "poll this
/// device only during business hours". Evaluated by the caller; the core
/// only stores and serves the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSchedule {
    pub id: i64,
    pub device_id: i64,
    pub cron_expression: String,
    pub enabled: bool,
}

/// Configuration entity: protocol enumeration row (spec §3 Protocol).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Protocol {
    pub id: i64,
    pub protocol_type: ProtocolType,
    pub category: String,
    pub default_port: Option<u16>,
    pub uses_serial: bool,
    pub requires_broker: bool,
    pub supported_operations: Vec<String>,
    pub supported_data_types: Vec<String>,
    pub connection_params_schema: serde_json::Value,
}

/// Engineering scaling for a DataPoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Scaling {
    pub factor: f64,
    pub offset: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Default for Scaling {
    fn default() -> Self {
        Self { factor: 1.0, offset: 0.0, min: None, max: None }
    }
}

/// Configuration entity: a single tag on a device (spec §3 DataPoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub id: i64,
    pub device_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub address: i64,
    pub data_type: DataType,
    pub access_mode: AccessMode,
    pub enabled: bool,
    pub scaling: Scaling,
    pub unit: Option<String>,
    pub logging_enabled: bool,
    pub logging_interval_ms: u32,
    pub deadband: f64,
    pub tags: Vec<String>,
    pub protocol_params: serde_json::Value,
}

/// Configuration entity: per-device tuning (spec §3 DeviceSettings).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub device_id: i64,
    pub polling_interval_ms: u32,
    pub connection_timeout_ms: u32,
    pub read_timeout_ms: u32,
    pub write_timeout_ms: u32,
    pub max_retry_count: u32,
    pub retry_interval_ms: u32,
    pub backoff_time_ms: u32,
    pub backoff_multiplier: f64,
    pub max_backoff_time_ms: u32,
    pub keep_alive_enabled: bool,
    pub keep_alive_interval_s: u32,
    pub keep_alive_timeout_s: u32,
    pub data_validation_enabled: bool,
    pub performance_monitoring_enabled: bool,
    pub diagnostic_mode: bool,
    /// Overrides the per-group scan rate the polling engine would otherwise
    /// derive from `polling_interval_ms` (spec §3).
    pub scan_rate_override: Option<u32>,
}

impl DeviceSettings {
    /// Validation from spec §8 Boundary behaviors: a polling interval of 0
    /// or negative is rejected at validation.
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.polling_interval_ms == 0 {
            return Err(PulseError::Config("polling_interval_ms must be positive".into()));
        }
        if self.backoff_multiplier <= 0.0 {
            return Err(PulseError::Config("backoff_multiplier must be > 0".into()));
        }
        for (name, v) in [
            ("connection_timeout_ms", self.connection_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("retry_interval_ms", self.retry_interval_ms),
            ("backoff_time_ms", self.backoff_time_ms),
            ("max_backoff_time_ms", self.max_backoff_time_ms),
        ] {
            if v == 0 {
                return Err(PulseError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Export target transport kind (spec §4.7, closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetKind {
    Http,
    S3,
    Mqtt,
    File,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Http => "HTTP",
            TargetKind::S3 => "S3",
            TargetKind::Mqtt => "MQTT",
            TargetKind::File => "FILE",
        }
    }
}

impl std::str::FromStr for TargetKind {
    type Err = PulseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP" => Ok(TargetKind::Http),
            "S3" => Ok(TargetKind::S3),
            "MQTT" => Ok(TargetKind::Mqtt),
            "FILE" => Ok(TargetKind::File),
            other => Err(PulseError::Config(format!("unknown target kind: {other}"))),
        }
    }
}

/// Configuration entity: an export destination (spec §3 ExportTarget).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportTarget {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub kind: TargetKind,
    pub enabled: bool,
    pub template_id: Option<i64>,
    pub transport_config: serde_json::Value,
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub alarm_ignore_minutes: Option<i64>,
    pub use_local_time: bool,
    pub max_batch_size: u32,
    pub batch_timeout_ms: u64,
    pub batch_alarms: bool,
}

/// Links a target to the points/sites it applies to (spec §3 ExportTargetMapping).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportTargetMapping {
    pub id: i64,
    pub target_id: i64,
    pub point_id: Option<i64>,
    pub site_id: Option<i64>,
    pub target_field_name: String,
    pub conversion: Option<String>,
}

impl ExportTargetMapping {
    /// A mapping with neither point nor site is the target's catch-all.
    pub fn is_catch_all(&self) -> bool {
        self.point_id.is_none() && self.site_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemplateCategory {
    Insite,
    Hdc,
    Bems,
    Generic,
    User,
}

impl TemplateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateCategory::Insite => "INSITE",
            TemplateCategory::Hdc => "HDC",
            TemplateCategory::Bems => "BEMS",
            TemplateCategory::Generic => "GENERIC",
            TemplateCategory::User => "USER",
        }
    }
}

impl std::str::FromStr for TemplateCategory {
    type Err = PulseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSITE" => Ok(TemplateCategory::Insite),
            "HDC" => Ok(TemplateCategory::Hdc),
            "BEMS" => Ok(TemplateCategory::Bems),
            "GENERIC" => Ok(TemplateCategory::Generic),
            "USER" => Ok(TemplateCategory::User),
            other => Err(PulseError::Config(format!("unknown template category: {other}"))),
        }
    }
}

/// Configuration entity: a JSON template tree (spec §3 PayloadTemplate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadTemplate {
    pub id: i64,
    pub category: TemplateCategory,
    pub body: serde_json::Value,
}

/// Configuration entity: a cron-scheduled export (spec §3 ExportSchedule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSchedule {
    pub id: i64,
    pub cron_expression: String,
    pub target_id: Option<i64>,
    pub target_group: Option<String>,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Per-dispatch attempt row (spec §3 ExportLog).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportLog {
    pub id: i64,
    pub target_id: i64,
    pub attempt_count: u32,
    pub success: bool,
    pub status_code: Option<u16>,
    pub sent_payload: Option<String>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
}

/// An operator- or system-raised alarm event, the other half of C6's
/// in-process ingress path alongside value-changed events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub site_id: i64,
    pub point_id: Option<i64>,
    pub point_name: Option<String>,
    pub description: Option<String>,
    pub measured_value: RawValue,
    pub timestamp: DateTime<Utc>,
    pub alarm_flag: bool,
    pub status: AlarmStatus,
    /// Operator-authored payloads bypass the transformer entirely (spec §4.8).
    pub manual_override: bool,
    pub extra_info: Option<serde_json::Value>,
    pub custom_vars: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmStatus {
    Normal,
    Alert,
    Acknowledged,
}

/// An event crossing C6's ingress queue: either a raw point update or an alarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchEvent {
    Value { device_id: i64, value: TimestampedValue },
    AlarmRaised(Alarm),
}

/// A Redis pub/sub command addressed to a specific collector instance
/// (spec §4.6, `cmd:<collector_id>` channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorCommand {
    pub server_id: String,
    pub command: String,
    pub payload: serde_json::Value,
}

/// Outcome of a single target handler send (spec §4.7 TargetSendResult).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSendResult {
    pub target_type: TargetKind,
    pub target_name: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub sent_payload: Option<String>,
    pub response_body: Option<String>,
    pub attempt_count: u32,
    pub latency_ms: u64,
}

/// Worker status surface for `GetWorkerStatus()` (spec §7 user-visible failure
/// behavior: offline devices report state plus the last error text).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub device_id: i64,
    pub state: DeviceState,
    pub last_error: Option<String>,
    pub last_value_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
}

/// Error taxonomy shared by every crate. Individual crates layer their own
/// `thiserror` enums and convert into this one at component boundaries that
/// spec §7 identifies as externally observable (status endpoints, logs).
#[derive(Debug, Error)]
pub enum PulseError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("repository error: {0}")]
    Repository(String),
    #[error("driver error ({class:?}): {message}")]
    Driver { class: DriverErrorClass, message: String },
    #[error("transform error: {0}")]
    Transform(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("secret resolution error: {0}")]
    Secret(String),
}

/// spec §7 error taxonomy's DriverError classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorClass {
    Transient,
    Protocol,
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_settings_rejects_zero_polling_interval() {
        let mut s = sample_settings();
        s.polling_interval_ms = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn device_settings_rejects_zero_backoff_multiplier() {
        let mut s = sample_settings();
        s.backoff_multiplier = 0.0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn device_settings_accepts_healthy_defaults() {
        assert!(sample_settings().validate().is_ok());
    }

    #[test]
    fn protocol_type_round_trips_symbolic_name() {
        for p in [
            ProtocolType::ModbusTcp,
            ProtocolType::ModbusRtu,
            ProtocolType::BacnetIp,
            ProtocolType::Mqtt,
            ProtocolType::OpcUa,
        ] {
            let parsed: ProtocolType = p.symbolic().parse().unwrap();
            assert_eq!(parsed, p);
        }
    }

    #[test]
    fn raw_value_scalar_detection_matches_transform_leaf_rule() {
        assert!(RawValue::Float(25.5).is_native_json_scalar());
        assert!(RawValue::Int(7).is_native_json_scalar());
        assert!(RawValue::Bool(true).is_native_json_scalar());
        assert!(!RawValue::Str("x".into()).is_native_json_scalar());
    }

    fn sample_settings() -> DeviceSettings {
        DeviceSettings {
            device_id: 1,
            polling_interval_ms: 1000,
            connection_timeout_ms: 3000,
            read_timeout_ms: 2000,
            write_timeout_ms: 2000,
            max_retry_count: 3,
            retry_interval_ms: 5000,
            backoff_time_ms: 5000,
            backoff_multiplier: 1.5,
            max_backoff_time_ms: 300_000,
            keep_alive_enabled: true,
            keep_alive_interval_s: 30,
            keep_alive_timeout_s: 5,
            data_validation_enabled: true,
            performance_monitoring_enabled: false,
            diagnostic_mode: false,
            scan_rate_override: None,
        }
    }
}
