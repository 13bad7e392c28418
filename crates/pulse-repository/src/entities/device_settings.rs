use crate::entity::{self, Entity};
use crate::error::RepoError;
use pulse_common::DeviceSettings;
use serde_json::{json, Value};
use sqlx::any::AnyRow;

/// `DeviceSettings` is keyed 1:1 by `device_id` (spec §3), not a separate
/// autoincrement id, so `id()`/`set_id()` alias `device_id` directly — there
/// is never an unassigned-id state for this entity, `save` is always an
/// upsert keyed on the device.
impl Entity for DeviceSettings {
    const TABLE: &'static str = "device_settings";
    const PRIMARY_KEY: &'static str = "device_id";
    const COLUMNS: &'static [&'static str] = &[
        "device_id", "polling_interval_ms", "connection_timeout_ms", "read_timeout_ms",
        "write_timeout_ms", "max_retry_count", "retry_interval_ms", "backoff_time_ms",
        "backoff_multiplier", "max_backoff_time_ms", "keep_alive_enabled",
        "keep_alive_interval_s", "keep_alive_timeout_s", "data_validation_enabled",
        "performance_monitoring_enabled", "diagnostic_mode", "scan_rate_override",
    ];

    fn id(&self) -> Option<i64> {
        Some(self.device_id)
    }

    fn set_id(&mut self, id: i64) {
        self.device_id = id;
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            json!(self.device_id),
            json!(self.polling_interval_ms),
            json!(self.connection_timeout_ms),
            json!(self.read_timeout_ms),
            json!(self.write_timeout_ms),
            json!(self.max_retry_count),
            json!(self.retry_interval_ms),
            json!(self.backoff_time_ms),
            json!(self.backoff_multiplier),
            json!(self.max_backoff_time_ms),
            json!(self.keep_alive_enabled),
            json!(self.keep_alive_interval_s),
            json!(self.keep_alive_timeout_s),
            json!(self.data_validation_enabled),
            json!(self.performance_monitoring_enabled),
            json!(self.diagnostic_mode),
            self.scan_rate_override.map(Value::from).unwrap_or(Value::Null),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self, RepoError> {
        Ok(DeviceSettings {
            device_id: entity::get_i64(row, "device_id")?,
            polling_interval_ms: entity::get_i64(row, "polling_interval_ms")? as u32,
            connection_timeout_ms: entity::get_i64(row, "connection_timeout_ms")? as u32,
            read_timeout_ms: entity::get_i64(row, "read_timeout_ms")? as u32,
            write_timeout_ms: entity::get_i64(row, "write_timeout_ms")? as u32,
            max_retry_count: entity::get_i64(row, "max_retry_count")? as u32,
            retry_interval_ms: entity::get_i64(row, "retry_interval_ms")? as u32,
            backoff_time_ms: entity::get_i64(row, "backoff_time_ms")? as u32,
            backoff_multiplier: entity::get_f64(row, "backoff_multiplier")?,
            max_backoff_time_ms: entity::get_i64(row, "max_backoff_time_ms")? as u32,
            keep_alive_enabled: entity::get_bool(row, "keep_alive_enabled")?,
            keep_alive_interval_s: entity::get_i64(row, "keep_alive_interval_s")? as u32,
            keep_alive_timeout_s: entity::get_i64(row, "keep_alive_timeout_s")? as u32,
            data_validation_enabled: entity::get_bool(row, "data_validation_enabled")?,
            performance_monitoring_enabled: entity::get_bool(row, "performance_monitoring_enabled")?,
            diagnostic_mode: entity::get_bool(row, "diagnostic_mode")?,
            scan_rate_override: entity::get_opt_i64(row, "scan_rate_override")?.map(|v| v as u32),
        })
    }
}
