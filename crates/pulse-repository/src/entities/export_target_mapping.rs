use crate::entity::{self, Entity};
use crate::error::RepoError;
use pulse_common::ExportTargetMapping;
use serde_json::{json, Value};
use sqlx::any::AnyRow;

impl Entity for ExportTargetMapping {
    const TABLE: &'static str = "export_target_mappings";
    const COLUMNS: &'static [&'static str] =
        &["id", "target_id", "point_id", "site_id", "target_field_name", "conversion"];

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
            self.point_id.map(Value::from).unwrap_or(Value::Null),
            self.site_id.map(Value::from).unwrap_or(Value::Null),
            json!(self.target_field_name),
            self.conversion.clone().map(Value::from).unwrap_or(Value::Null),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self, RepoError> {
        Ok(ExportTargetMapping {
            id: entity::get_i64(row, "id")?,
            target_id: entity::get_i64(row, "target_id")?,
            point_id: entity::get_opt_i64(row, "point_id")?,
            site_id: entity::get_opt_i64(row, "site_id")?,
            target_field_name: entity::get_string(row, "target_field_name")?,
            conversion: entity::get_opt_string(row, "conversion")?,
        })
    }
}
