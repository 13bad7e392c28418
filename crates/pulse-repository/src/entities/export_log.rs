use crate::entity::{self, Entity};
use crate::error::RepoError;
use pulse_common::ExportLog;
use serde_json::{json, Value};
use sqlx::any::AnyRow;

impl Entity for ExportLog {
    const TABLE: &'static str = "export_logs";
    const COLUMNS: &'static [&'static str] = &[
        "id", "target_id", "attempt_count", "success", "status_code", "sent_payload",
        "response_body", "error_message", "started_at", "finished_at", "latency_ms",
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
            json!(self.target_id),
            json!(self.attempt_count),
            json!(self.success),
            self.status_code.map(Value::from).unwrap_or(Value::Null),
            self.sent_payload.clone().map(Value::from).unwrap_or(Value::Null),
            self.response_body.clone().map(Value::from).unwrap_or(Value::Null),
            self.error_message.clone().map(Value::from).unwrap_or(Value::Null),
            json!(self.started_at.to_rfc3339()),
            json!(self.finished_at.to_rfc3339()),
            json!(self.latency_ms),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self, RepoError> {
        Ok(ExportLog {
            id: entity::get_i64(row, "id")?,
            target_id: entity::get_i64(row, "target_id")?,
            attempt_count: entity::get_i64(row, "attempt_count")? as u32,
            success: entity::get_bool(row, "success")?,
            status_code: entity::get_opt_i64(row, "status_code")?.map(|v| v as u16),
            sent_payload: entity::get_opt_string(row, "sent_payload")?,
            response_body: entity::get_opt_string(row, "response_body")?,
            error_message: entity::get_opt_string(row, "error_message")?,
            started_at: entity::get_datetime(row, "started_at")?,
            finished_at: entity::get_datetime(row, "finished_at")?,
            latency_ms: entity::get_i64(row, "latency_ms")? as u64,
        })
    }
}
