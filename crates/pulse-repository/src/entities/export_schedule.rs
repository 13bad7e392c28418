use crate::entity::{self, Entity};
use crate::error::RepoError;
use pulse_common::ExportSchedule;
use serde_json::{json, Value};
use sqlx::any::AnyRow;

impl Entity for ExportSchedule {
    const TABLE: &'static str = "export_schedules";
    const COLUMNS: &'static [&'static str] =
        &["id", "cron_expression", "target_id", "target_group", "enabled", "last_run_at"];

    fn id(&self) -> Option<i64> {
        if self.id == 0 { None } else { Some(self.id) }
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.id().map(Value::from).unwrap_or(Value::Null),
            json!(self.cron_expression),
            self.target_id.map(Value::from).unwrap_or(Value::Null),
            self.target_group.clone().map(Value::from).unwrap_or(Value::Null),
            json!(self.enabled),
            self.last_run_at.map(|t| json!(t.to_rfc3339())).unwrap_or(Value::Null),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self, RepoError> {
        let last_run_raw = entity::get_opt_string(row, "last_run_at")?;
        let last_run_at = last_run_raw
            .map(|raw| {
                chrono::DateTime::parse_from_rfc3339(&raw)
                    .map(|d| d.with_timezone(&chrono::Utc))
                    .map_err(|e| RepoError::Column(format!("last_run_at: {e}")))
            })
            .transpose()?;
        Ok(ExportSchedule {
            id: entity::get_i64(row, "id")?,
            cron_expression: entity::get_string(row, "cron_expression")?,
            target_id: entity::get_opt_i64(row, "target_id")?,
            target_group: entity::get_opt_string(row, "target_group")?,
            enabled: entity::get_bool(row, "enabled")?,
            last_run_at,
        })
    }
}
