use crate::entity::{self, Entity};
use crate::error::RepoError;
use pulse_common::Device;
use serde_json::{json, Value};
use sqlx::any::AnyRow;

impl Entity for Device {
    const TABLE: &'static str = "devices";
    const COLUMNS: &'static [&'static str] = &[
        "id", "tenant_id", "site_id", "edge_server_id", "name", "protocol_id", "endpoint",
        "config_blob", "enabled", "polling_interval_ms", "timeout_ms", "retry_count",
        "created_at", "updated_at",
    ];

    fn id(&self) -> Option<i64> {
        if self.id == 0 { None } else { Some(self.id) }
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.id().map(Value::from).unwrap_or(Value::Null),
            json!(self.tenant_id),
            json!(self.site_id),
            self.edge_server_id.map(Value::from).unwrap_or(Value::Null),
            json!(self.name),
            json!(self.protocol_id),
            json!(self.endpoint),
            self.config_blob.clone(),
            json!(self.enabled),
            json!(self.polling_interval_ms),
            json!(self.timeout_ms),
            json!(self.retry_count),
            json!(self.created_at.to_rfc3339()),
            json!(self.updated_at.to_rfc3339()),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self, RepoError> {
        Ok(Device {
            id: entity::get_i64(row, "id")?,
            tenant_id: entity::get_i64(row, "tenant_id")?,
            site_id: entity::get_i64(row, "site_id")?,
            edge_server_id: entity::get_opt_i64(row, "edge_server_id")?,
            name: entity::get_string(row, "name")?,
            protocol_id: entity::get_i64(row, "protocol_id")?,
            endpoint: entity::get_string(row, "endpoint")?,
            config_blob: entity::get_json(row, "config_blob")?,
            enabled: entity::get_bool(row, "enabled")?,
            polling_interval_ms: entity::get_i64(row, "polling_interval_ms")? as u32,
            timeout_ms: entity::get_i64(row, "timeout_ms")? as u32,
            retry_count: entity::get_i64(row, "retry_count")? as u32,
            created_at: entity::get_datetime(row, "created_at")?,
            updated_at: entity::get_datetime(row, "updated_at")?,
        })
    }
}
