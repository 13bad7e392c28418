use crate::entity::{self, Entity};
use crate::error::RepoError;
use pulse_common::DeviceSchedule;
use serde_json::{json, Value};
use sqlx::any::AnyRow;

impl Entity for DeviceSchedule {
    const TABLE: &'static str = "device_schedules";
    const COLUMNS: &'static [&'static str] = &["id", "device_id", "cron_expression", "enabled"];

    fn id(&self) -> Option<i64> {
        if self.id == 0 { None } else { Some(self.id) }
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.id().map(Value::from).unwrap_or(Value::Null),
            json!(self.device_id),
            json!(self.cron_expression),
            json!(self.enabled),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self, RepoError> {
        Ok(DeviceSchedule {
            id: entity::get_i64(row, "id")?,
            device_id: entity::get_i64(row, "device_id")?,
            cron_expression: entity::get_string(row, "cron_expression")?,
            enabled: entity::get_bool(row, "enabled")?,
        })
    }
}
