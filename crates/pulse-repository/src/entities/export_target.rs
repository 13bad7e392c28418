use crate::entity::{self, Entity};
use crate::error::RepoError;
use pulse_common::ExportTarget;
use serde_json::{json, Value};
use sqlx::any::AnyRow;

impl Entity for ExportTarget {
    const TABLE: &'static str = "export_targets";
    const COLUMNS: &'static [&'static str] = &[
        "id", "tenant_id", "name", "kind", "enabled", "template_id", "transport_config",
        "max_retries", "initial_delay_ms", "backoff_multiplier", "max_backoff_ms",
        "alarm_ignore_minutes", "use_local_time", "max_batch_size", "batch_timeout_ms",
        "batch_alarms",
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
            json!(self.name),
            json!(self.kind.as_str()),
            json!(self.enabled),
            self.template_id.map(Value::from).unwrap_or(Value::Null),
            self.transport_config.clone(),
            json!(self.max_retries),
            json!(self.initial_delay_ms),
            json!(self.backoff_multiplier),
            json!(self.max_backoff_ms),
            self.alarm_ignore_minutes.map(Value::from).unwrap_or(Value::Null),
            json!(self.use_local_time),
            json!(self.max_batch_size),
            json!(self.batch_timeout_ms),
            json!(self.batch_alarms),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self, RepoError> {
        let kind_str = entity::get_string(row, "kind")?;
        Ok(ExportTarget {
            id: entity::get_i64(row, "id")?,
            tenant_id: entity::get_i64(row, "tenant_id")?,
            name: entity::get_string(row, "name")?,
            kind: kind_str.parse().map_err(|_| RepoError::Column(format!("unknown kind: {kind_str}")))?,
            enabled: entity::get_bool(row, "enabled")?,
            template_id: entity::get_opt_i64(row, "template_id")?,
            transport_config: entity::get_json(row, "transport_config")?,
            max_retries: entity::get_i64(row, "max_retries")? as u32,
            initial_delay_ms: entity::get_i64(row, "initial_delay_ms")? as u64,
            backoff_multiplier: entity::get_f64(row, "backoff_multiplier")?,
            max_backoff_ms: entity::get_i64(row, "max_backoff_ms")? as u64,
            alarm_ignore_minutes: entity::get_opt_i64(row, "alarm_ignore_minutes")?,
            use_local_time: entity::get_bool(row, "use_local_time")?,
            max_batch_size: entity::get_i64(row, "max_batch_size")? as u32,
            batch_timeout_ms: entity::get_i64(row, "batch_timeout_ms")? as u64,
            batch_alarms: entity::get_bool(row, "batch_alarms")?,
        })
    }
}
